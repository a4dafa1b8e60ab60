// SPDX-License-Identifier: Apache-2.0
//! Write-time normalization of network responses.
//!
//! The normalizer walks a selection tree and a response object in
//! lockstep, flattening the nested response into typed records. Nested
//! objects are replaced by links; identity comes from the object's own
//! `id` field when present and is synthesized from the object's
//! position otherwise. Response-level errors are attached to the
//! deepest field their path identifies.

use tracing::debug;

use crate::changeset::EncounteredIds;
use crate::error::NormalizeError;
use crate::ident::{DataId, Link, TypeName};
use crate::response::{ResponseError, ResponseObject, ResponseValue};
use crate::selection::{
    argument_key_chunk, response_key, storage_key, LinkedSelection, ScalarSelection,
    SelectionNode, Variables, ARGUMENT_SEPARATOR, VALUE_SEPARATOR,
};
use crate::store::{LayerId, LayeredStore};
use crate::value::{FieldError, FieldValue, PathSegment};

/// Normalizes `response` into `layer`, anchored at the `root` record.
///
/// Records whose chain-visible data actually changed are added to
/// `encountered`; re-normalizing an identical response adds nothing.
/// `errors` are the response's top-level errors; each is stored on the
/// deepest field its path reaches in the written data.
#[allow(clippy::too_many_arguments)]
pub fn normalize_into_layer(
    store: &mut LayeredStore,
    layer: LayerId,
    selections: &[SelectionNode],
    response: &ResponseObject,
    errors: &[ResponseError],
    variables: &Variables,
    root: &Link,
    root_typename: &TypeName,
    encountered: &mut EncounteredIds,
) -> Result<(), NormalizeError> {
    let before = encountered.len();
    let mut normalizer = Normalizer {
        store,
        layer,
        variables,
        root_typename,
        errors,
        encountered,
    };
    let mut path = Vec::new();
    normalizer.normalize_object(selections, response, root, &mut path)?;
    debug!(
        changed = encountered.len() - before,
        errors = errors.len(),
        "normalized network response"
    );
    Ok(())
}

struct Normalizer<'a> {
    store: &'a mut LayeredStore,
    layer: LayerId,
    variables: &'a Variables,
    root_typename: &'a TypeName,
    errors: &'a [ResponseError],
    encountered: &'a mut EncounteredIds,
}

impl Normalizer<'_> {
    fn normalize_object(
        &mut self,
        selections: &[SelectionNode],
        response: &ResponseObject,
        target: &Link,
        path: &mut Vec<PathSegment>,
    ) -> Result<bool, NormalizeError> {
        let mut updated = false;
        for node in selections {
            match node {
                SelectionNode::Scalar(scalar) => {
                    updated |= self.normalize_scalar(scalar, response, target, path)?;
                }
                SelectionNode::Linked(linked) => {
                    updated |= self.normalize_linked(linked, response, target, path)?;
                }
                SelectionNode::InlineFragment(fragment) => {
                    if response.typename() == Some(fragment.type_condition.as_str()) {
                        updated |=
                            self.normalize_object(&fragment.selections, response, target, path)?;
                    }
                }
            }
        }
        if updated {
            self.encountered
                .insert(target.typename.clone(), target.id.clone());
        }
        Ok(updated)
    }

    fn normalize_scalar(
        &mut self,
        node: &ScalarSelection,
        response: &ResponseObject,
        target: &Link,
        path: &mut Vec<PathSegment>,
    ) -> Result<bool, NormalizeError> {
        let lookup = response_key(&node.field_name, &node.arguments);
        let key = storage_key(&node.field_name, &node.arguments, self.variables);
        path.push(PathSegment::Key(lookup.clone()));
        let value = match response.get(&lookup) {
            // Absent counts the same as an explicit null: the field was
            // selected and nothing came back, so stale data from an
            // earlier response must not survive.
            None | Some(ResponseValue::Null) => {
                let errors = self.matching_errors(path);
                if errors.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Errors(errors)
                }
            }
            Some(ResponseValue::Scalar(s)) => FieldValue::Scalar(s.clone()),
            Some(ResponseValue::List(items)) => {
                let mut scalars = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ResponseValue::Scalar(s) => scalars.push(s.clone()),
                        _ => {
                            return Err(NormalizeError::ScalarExpected { key: lookup });
                        }
                    }
                }
                FieldValue::ScalarList(scalars)
            }
            Some(ResponseValue::Object(_)) => {
                return Err(NormalizeError::ScalarExpected { key: lookup });
            }
        };
        path.pop();
        Ok(self.write(target, key, value))
    }

    fn normalize_linked(
        &mut self,
        node: &LinkedSelection,
        response: &ResponseObject,
        target: &Link,
        path: &mut Vec<PathSegment>,
    ) -> Result<bool, NormalizeError> {
        let lookup = response_key(&node.field_name, &node.arguments);
        let key = storage_key(&node.field_name, &node.arguments, self.variables);
        path.push(PathSegment::Key(lookup.clone()));
        let value = match response.get(&lookup) {
            None | Some(ResponseValue::Null) => {
                let errors = self.matching_errors(path);
                if errors.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Errors(errors)
                }
            }
            Some(ResponseValue::Scalar(_)) => {
                path.pop();
                return Err(NormalizeError::ObjectExpected { key: lookup });
            }
            Some(ResponseValue::Object(object)) => {
                let link = self.normalize_linked_object(node, object, target, None, path)?;
                FieldValue::Link(link)
            }
            Some(ResponseValue::List(items)) => {
                let mut links = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match item {
                        ResponseValue::Null => links.push(None),
                        ResponseValue::Object(object) => {
                            path.push(PathSegment::Index(index));
                            let link = self.normalize_linked_object(
                                node,
                                object,
                                target,
                                Some(index),
                                path,
                            )?;
                            path.pop();
                            links.push(Some(link));
                        }
                        _ => {
                            path.pop();
                            return Err(NormalizeError::ObjectExpected { key: lookup });
                        }
                    }
                }
                FieldValue::LinkList(links)
            }
        };
        path.pop();
        Ok(self.write(target, key, value))
    }

    /// Resolves the identity of one nested object and normalizes its
    /// selections into that record. Returns the link to store in the
    /// parent's slot.
    fn normalize_linked_object(
        &mut self,
        node: &LinkedSelection,
        object: &ResponseObject,
        parent: &Link,
        index: Option<usize>,
        path: &mut Vec<PathSegment>,
    ) -> Result<Link, NormalizeError> {
        let typename = match &node.concrete_type {
            Some(typename) => typename.clone(),
            None => match object.typename() {
                Some(name) => TypeName::new(name),
                None => {
                    return Err(NormalizeError::MissingTypename {
                        key: response_key(&node.field_name, &node.arguments),
                    });
                }
            },
        };
        let link = if typename == *self.root_typename {
            // Nested selections of the root type fold back onto the
            // singleton root record.
            Link::root(typename)
        } else {
            let id = object.id().map_or_else(
                || self.synthesize_id(parent, node, index),
                |id| DataId::new(id),
            );
            Link { typename, id }
        };
        self.normalize_object(&node.selections, object, &link, path)?;
        Ok(link)
    }

    /// Id for an object with no `id` of its own: scoped to its parent
    /// record, field, list position, and canonicalized arguments.
    fn synthesize_id(&self, parent: &Link, node: &LinkedSelection, index: Option<usize>) -> DataId {
        let mut id = format!("{}.{}", parent.id, node.field_name);
        if let Some(index) = index {
            id.push('.');
            id.push_str(&index.to_string());
        }
        for argument in &node.arguments {
            id.push_str(ARGUMENT_SEPARATOR);
            id.push_str(&argument.name);
            id.push_str(VALUE_SEPARATOR);
            id.push_str(&argument_key_chunk(&argument.value, self.variables));
        }
        DataId::new(id)
    }

    /// Writes `value` into the target layer. Returns whether the value
    /// differs from what the chain showed before the write.
    fn write(&mut self, target: &Link, key: String, value: FieldValue) -> bool {
        let existing = self
            .store
            .field(self.layer, target, &key)
            .ok()
            .flatten()
            .cloned();
        let changed = existing.as_ref() != Some(&value);
        // Always write so the slot is defined in this layer even when
        // the merged view already showed the same value.
        let _ = self.store.write_field(self.layer, target, key, value);
        changed
    }

    /// Errors whose path starts with `path`, segment by segment. The
    /// stored error keeps its own full path.
    fn matching_errors(&self, path: &[PathSegment]) -> Vec<FieldError> {
        self.errors
            .iter()
            .filter(|error| error.path.len() >= path.len() && error.path.starts_with(path))
            .map(|error| FieldError::new(error.message.clone(), error.path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{linked, scalar};
    use crate::value::ScalarValue;

    fn setup() -> (LayeredStore, Link, TypeName) {
        let root_typename = TypeName::new("Query");
        let store = LayeredStore::new(&root_typename);
        (store, Link::root("Query"), root_typename)
    }

    fn normalize(
        store: &mut LayeredStore,
        selections: &[SelectionNode],
        response: &ResponseObject,
    ) -> EncounteredIds {
        let root = Link::root("Query");
        let root_typename = TypeName::new("Query");
        let mut encountered = EncounteredIds::new();
        let layer = store.base();
        normalize_into_layer(
            store,
            layer,
            selections,
            response,
            &[],
            &Variables::new(),
            &root,
            &root_typename,
            &mut encountered,
        )
        .map(|()| encountered)
        .unwrap_or_default()
    }

    #[test]
    fn scalar_fields_write_raw_values() {
        let (mut store, root, _) = setup();
        let selections = vec![scalar("name")];
        let response = ResponseObject::new().with("name", "Jeremy Bentham");
        let changed = normalize(&mut store, &selections, &response);
        assert!(changed.contains(&root));
        assert_eq!(
            store.field(store.base(), &root, "name").ok().flatten(),
            Some(&FieldValue::Scalar(ScalarValue::from("Jeremy Bentham")))
        );
    }

    #[test]
    fn nested_objects_become_records_and_links() {
        let (mut store, root, _) = setup();
        let selections = vec![linked(
            "me",
            vec![scalar("__typename"), scalar("id"), scalar("name")],
        )];
        let response = ResponseObject::new().with(
            "me",
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0")
                .with("name", "Jeremy Bentham"),
        );
        let changed = normalize(&mut store, &selections, &response);
        let me = Link::new("Economist", "0");
        assert!(changed.contains(&me));
        assert_eq!(
            store.field(store.base(), &root, "me").ok().flatten(),
            Some(&FieldValue::Link(me.clone()))
        );
        assert_eq!(
            store.field(store.base(), &me, "name").ok().flatten(),
            Some(&FieldValue::Scalar(ScalarValue::from("Jeremy Bentham")))
        );
    }

    #[test]
    fn objects_without_id_get_position_scoped_identity() {
        let (mut store, root, _) = setup();
        let selections = vec![linked(
            "settings",
            vec![scalar("__typename"), scalar("darkMode")],
        )];
        let response = ResponseObject::new().with(
            "settings",
            ResponseObject::new()
                .with("__typename", "Settings")
                .with("darkMode", true),
        );
        normalize(&mut store, &selections, &response);
        assert_eq!(
            store.field(store.base(), &root, "settings").ok().flatten(),
            Some(&FieldValue::Link(Link::new("Settings", "__ROOT.settings")))
        );
    }

    #[test]
    fn second_normalization_of_same_response_changes_nothing() {
        let (mut store, _, _) = setup();
        let selections = vec![linked("me", vec![scalar("__typename"), scalar("id")])];
        let response = ResponseObject::new().with(
            "me",
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0"),
        );
        let first = normalize(&mut store, &selections, &response);
        assert!(!first.is_empty());
        let second = normalize(&mut store, &selections, &response);
        assert!(second.is_empty());
    }

    #[test]
    fn fields_absent_from_a_refetch_overwrite_with_null() {
        let (mut store, _, _) = setup();
        let selections = vec![linked(
            "me",
            vec![scalar("__typename"), scalar("id"), scalar("name")],
        )];
        let full = ResponseObject::new().with(
            "me",
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0")
                .with("name", "Jeremy Bentham"),
        );
        normalize(&mut store, &selections, &full);

        let partial = ResponseObject::new().with(
            "me",
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0"),
        );
        let changed = normalize(&mut store, &selections, &partial);
        let me = Link::new("Economist", "0");
        assert!(changed.contains(&me));
        assert_eq!(
            store.field(store.base(), &me, "name").ok().flatten(),
            Some(&FieldValue::Null)
        );
    }

    #[test]
    fn null_linked_field_stops_recursion() {
        let (mut store, root, _) = setup();
        let selections = vec![linked("me", vec![scalar("id")])];
        let response = ResponseObject::new().with("me", ResponseValue::Null);
        normalize(&mut store, &selections, &response);
        assert_eq!(
            store.field(store.base(), &root, "me").ok().flatten(),
            Some(&FieldValue::Null)
        );
    }

    #[test]
    fn root_typed_nested_object_resolves_to_the_root_record() {
        let (mut store, root, _) = setup();
        let selections = vec![linked(
            "query",
            vec![scalar("__typename"), scalar("version")],
        )];
        let response = ResponseObject::new().with(
            "query",
            ResponseObject::new()
                .with("__typename", "Query")
                .with("version", 2_i64),
        );
        normalize(&mut store, &selections, &response);
        assert_eq!(
            store.field(store.base(), &root, "query").ok().flatten(),
            Some(&FieldValue::Link(Link::root("Query")))
        );
        assert_eq!(
            store.field(store.base(), &root, "version").ok().flatten(),
            Some(&FieldValue::Scalar(ScalarValue::Int(2)))
        );
    }

    #[test]
    fn scalar_where_object_expected_is_a_structural_error() {
        let (mut store, root, root_typename) = setup();
        let selections = vec![linked("me", vec![scalar("id")])];
        let response = ResponseObject::new().with("me", "not-an-object");
        let mut encountered = EncounteredIds::new();
        let layer = store.base();
        let result = normalize_into_layer(
            &mut store,
            layer,
            &selections,
            &response,
            &[],
            &Variables::new(),
            &root,
            &root_typename,
            &mut encountered,
        );
        assert_eq!(
            result,
            Err(NormalizeError::ObjectExpected { key: "me".into() })
        );
    }

    #[test]
    fn response_error_lands_on_the_deepest_null_field() {
        let (mut store, root, root_typename) = setup();
        let selections = vec![linked("me", vec![scalar("id"), scalar("name")])];
        let response = ResponseObject::new().with("me", ResponseValue::Null);
        let errors = vec![ResponseError::new(
            "boom",
            vec![PathSegment::key("me"), PathSegment::key("name")],
        )];
        let mut encountered = EncounteredIds::new();
        let layer = store.base();
        let result = normalize_into_layer(
            &mut store,
            layer,
            &selections,
            &response,
            &errors,
            &Variables::new(),
            &root,
            &root_typename,
            &mut encountered,
        );
        assert!(result.is_ok());
        let stored = store.field(store.base(), &root, "me").ok().flatten();
        assert!(matches!(stored, Some(FieldValue::Errors(errs)) if errs.len() == 1));
    }

    #[test]
    fn successful_overwrite_clears_stored_errors() {
        let (mut store, root, _) = setup();
        let base = store.base();
        store
            .write_field(
                base,
                &root,
                "me",
                FieldValue::Errors(vec![FieldError::new("boom", vec![])]),
            )
            .ok();
        let selections = vec![linked("me", vec![scalar("__typename"), scalar("id")])];
        let response = ResponseObject::new().with(
            "me",
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0"),
        );
        let changed = normalize(&mut store, &selections, &response);
        assert!(changed.contains(&root));
        assert_eq!(
            store.field(store.base(), &root, "me").ok().flatten(),
            Some(&FieldValue::Link(Link::new("Economist", "0")))
        );
    }
}
