// SPDX-License-Identifier: Apache-2.0
//! Materializing reads: turn a reader tree plus the store into data.
//!
//! Reads are total over the tree: either every slot resolves and the
//! caller gets a value plus the set of records the walk touched, or the
//! read reports the first record it could not serve. Errored slots do
//! not abort the read; they materialize as `Null` and surface in the
//! aggregated error list, so sibling fields stay readable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::changeset::EncounteredIds;
use crate::error::InvariantError;
use crate::ident::Link;
use crate::reader::{LoadFn, ReaderNode};
use crate::selection::{child_variables, storage_key, Variables};
use crate::value::{FieldError, FieldValue, PathSegment, ScalarValue};
use crate::store::{LayerId, LayeredStore, RecordView};

/// An object produced by a read: output keys mapped to values.
pub type DataObject = BTreeMap<String, DataValue>;

/// A value materialized by a read.
///
/// Containers are `Arc`-shared so that an unchanged subtree can be
/// recycled across re-reads and compared by pointer.
#[derive(Clone, PartialEq, Debug)]
pub enum DataValue {
    /// Confirmed absent.
    Null,
    /// A leaf value.
    Scalar(ScalarValue),
    /// A list of values.
    List(Arc<Vec<DataValue>>),
    /// An object of output keys.
    Object(Arc<DataObject>),
    /// A record reference, emitted verbatim.
    Link(Link),
    /// A capability field; compares by stable id.
    Loadable(LoadableField),
}

impl DataValue {
    /// Wraps an object in the shared container.
    #[must_use]
    pub fn object(object: DataObject) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Wraps a list in the shared container.
    #[must_use]
    pub fn list(items: Vec<DataValue>) -> Self {
        Self::List(Arc::new(items))
    }

    /// Returns the object, if this value is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&DataObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the scalar, if this value is one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// A loadable field as it reads out: a stable identity plus the factory
/// that starts the underlying operation.
#[derive(Clone)]
pub struct LoadableField {
    /// Identity of the loadable: record, field name, and argument scope.
    pub stable_id: String,
    /// Starts the operation.
    pub load: LoadFn,
}

impl PartialEq for LoadableField {
    fn eq(&self, other: &Self) -> bool {
        self.stable_id == other.stable_id
    }
}

impl fmt::Debug for LoadableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableField")
            .field("stable_id", &self.stable_id)
            .finish_non_exhaustive()
    }
}

/// A successful read: the value, the records the walk touched, and any
/// field errors encountered along the way.
#[derive(Clone, PartialEq, Debug)]
pub struct WithEncounteredRecords {
    /// Every record the read visited, by type and id.
    pub encountered: EncounteredIds,
    /// The materialized value.
    pub item: DataValue,
    /// Errors from slots that read out as `Null`.
    pub errors: Vec<FieldError>,
}

/// Outcome of a materializing read.
#[derive(Clone, PartialEq, Debug)]
pub enum ReadOutcome {
    /// The store served the whole tree.
    Success(WithEncounteredRecords),
    /// A slot was missing; `record` is the first record the walk could
    /// not serve.
    MissingData {
        /// What was missing, for logs.
        reason: String,
        /// The record to wait on.
        record: Link,
    },
}

impl ReadOutcome {
    /// Returns the successful read, if there was one.
    #[must_use]
    pub fn into_success(self) -> Option<WithEncounteredRecords> {
        match self {
            Self::Success(read) => Some(read),
            Self::MissingData { .. } => None,
        }
    }
}

/// Reads `ast` from the chain anchored at `layer`, starting at `root`.
pub fn read_fragment(
    store: &LayeredStore,
    layer: LayerId,
    ast: &[ReaderNode],
    root: &Link,
    variables: &Variables,
) -> Result<ReadOutcome, InvariantError> {
    let mut reader = Reader {
        store,
        layer,
        encountered: EncounteredIds::new(),
        errors: Vec::new(),
        path: Vec::new(),
    };
    reader.encountered.insert_link(root);
    match reader.read_record(root, ast, variables)? {
        Step::Value(item) => Ok(ReadOutcome::Success(WithEncounteredRecords {
            encountered: reader.encountered,
            item,
            errors: reader.errors,
        })),
        Step::Missing { reason, record } => Ok(ReadOutcome::MissingData { reason, record }),
    }
}

enum Step {
    Value(DataValue),
    Missing { reason: String, record: Link },
}

struct Reader<'a> {
    store: &'a LayeredStore,
    layer: LayerId,
    encountered: EncounteredIds,
    errors: Vec<FieldError>,
    path: Vec<PathSegment>,
}

impl Reader<'_> {
    fn read_record(
        &mut self,
        link: &Link,
        ast: &[ReaderNode],
        variables: &Variables,
    ) -> Result<Step, InvariantError> {
        let record = match self.store.record(self.layer, link)? {
            RecordView::Record(record) => record,
            RecordView::Absent => return Ok(Step::Value(DataValue::Null)),
            RecordView::Missing => {
                return Ok(Step::Missing {
                    reason: format!("record {link} has not been fetched"),
                    record: link.clone(),
                });
            }
        };
        let mut object = DataObject::new();
        for node in ast {
            let output_key = node.output_key().to_owned();
            let value = match node {
                ReaderNode::Scalar {
                    field_name,
                    arguments,
                    ..
                } => {
                    let key = storage_key(field_name, arguments, variables);
                    match record.get(&key) {
                        None => {
                            return Ok(Step::Missing {
                                reason: format!("field {key} is missing on {link}"),
                                record: link.clone(),
                            });
                        }
                        Some(FieldValue::Errors(stored)) => {
                            self.record_errors(stored, &output_key);
                            DataValue::Null
                        }
                        Some(value) => Self::leaf_value(value),
                    }
                }
                ReaderNode::Linked {
                    field_name,
                    arguments,
                    selections,
                    ..
                } => {
                    let key = storage_key(field_name, arguments, variables);
                    match record.get(&key) {
                        None => {
                            return Ok(Step::Missing {
                                reason: format!("field {key} is missing on {link}"),
                                record: link.clone(),
                            });
                        }
                        Some(FieldValue::Errors(stored)) => {
                            self.record_errors(stored, &output_key);
                            DataValue::Null
                        }
                        Some(FieldValue::Null) => DataValue::Null,
                        Some(FieldValue::Link(target)) => {
                            self.path.push(PathSegment::key(&output_key));
                            let step = self.follow(target, selections, variables)?;
                            self.path.pop();
                            match step {
                                Step::Value(value) => value,
                                missing @ Step::Missing { .. } => return Ok(missing),
                            }
                        }
                        Some(FieldValue::LinkList(targets)) => {
                            self.path.push(PathSegment::key(&output_key));
                            let mut items = Vec::with_capacity(targets.len());
                            for (index, target) in targets.iter().enumerate() {
                                let Some(target) = target else {
                                    items.push(DataValue::Null);
                                    continue;
                                };
                                self.path.push(PathSegment::Index(index));
                                let step = self.follow(target, selections, variables)?;
                                self.path.pop();
                                match step {
                                    Step::Value(value) => items.push(value),
                                    missing @ Step::Missing { .. } => {
                                        self.path.pop();
                                        return Ok(missing);
                                    }
                                }
                            }
                            self.path.pop();
                            DataValue::list(items)
                        }
                        Some(FieldValue::Scalar(_) | FieldValue::ScalarList(_)) => {
                            return Err(InvariantError::NonLinkValue {
                                record: link.clone(),
                                key,
                            });
                        }
                    }
                }
                ReaderNode::Link { .. } => DataValue::Link(link.clone()),
                ReaderNode::Resolver {
                    arguments,
                    selections,
                    resolve,
                    ..
                } => {
                    let child = child_variables(arguments, variables);
                    self.path.push(PathSegment::key(&output_key));
                    let step = self.read_record(link, selections, &child)?;
                    self.path.pop();
                    match step {
                        Step::Value(value) => resolve(&value, &child),
                        missing @ Step::Missing { .. } => return Ok(missing),
                    }
                }
                ReaderNode::Loadable {
                    name,
                    arguments,
                    load,
                    ..
                } => {
                    let child = child_variables(arguments, variables);
                    DataValue::Loadable(LoadableField {
                        stable_id: loadable_stable_id(link, name, &child),
                        load: Arc::clone(load),
                    })
                }
            };
            object.insert(output_key, value);
        }
        Ok(Step::Value(DataValue::object(object)))
    }

    fn follow(
        &mut self,
        target: &Link,
        selections: &[ReaderNode],
        variables: &Variables,
    ) -> Result<Step, InvariantError> {
        self.encountered.insert_link(target);
        self.read_record(target, selections, variables)
    }

    fn record_errors(&mut self, stored: &[FieldError], output_key: &str) {
        let mut path = self.path.clone();
        path.push(PathSegment::key(output_key));
        for error in stored {
            self.errors
                .push(FieldError::new(error.message.clone(), path.clone()));
        }
    }

    fn leaf_value(value: &FieldValue) -> DataValue {
        match value {
            FieldValue::Null | FieldValue::Errors(_) => DataValue::Null,
            FieldValue::Scalar(s) => DataValue::Scalar(s.clone()),
            FieldValue::ScalarList(items) => DataValue::list(
                items.iter().map(|s| DataValue::Scalar(s.clone())).collect(),
            ),
            FieldValue::Link(link) => DataValue::Link(link.clone()),
            FieldValue::LinkList(links) => DataValue::list(
                links
                    .iter()
                    .map(|link| {
                        link.as_ref()
                            .map_or(DataValue::Null, |l| DataValue::Link(l.clone()))
                    })
                    .collect(),
            ),
        }
    }
}

/// Stable identity for a loadable field: the owning record, the field
/// name, and the resolved argument scope. Equal ids mean the loadable
/// would issue the same operation.
fn loadable_stable_id(link: &Link, name: &str, variables: &Variables) -> String {
    let mut id = format!("{}:{}/{name}/", link.typename, link.id);
    let mut first = true;
    for (key, value) in variables.iter() {
        if !first {
            id.push(',');
        }
        first = false;
        id.push_str(key);
        id.push('=');
        id.push_str(&value.to_key_chunk());
    }
    id
}
