// SPDX-License-Identifier: Apache-2.0
//! Selection trees and argument canonicalization.
//!
//! A selection tree describes the shape of a network response so that
//! the normalizer, checker, and garbage collector can walk response
//! data and store records in lockstep. Field arguments are folded into
//! storage keys so that the same field selected with the same argument
//! values always lands in the same record slot, regardless of alias.

use std::collections::BTreeMap;

use crate::ident::TypeName;
use crate::value::{ScalarValue, StorageKey};

/// Separates a field name from each argument chunk in a key.
pub const ARGUMENT_SEPARATOR: &str = "____";
/// Separates an argument name from its value within a chunk.
pub const VALUE_SEPARATOR: &str = "___";

/// Storage key of the type discriminator field.
pub const TYPENAME_KEY: &str = "__typename";
/// Response key carrying a record's own id.
pub const ID_KEY: &str = "id";

/// An argument value as written in a selection.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArgumentValue {
    /// Inline literal (number, boolean).
    Literal(ScalarValue),
    /// Inline string literal.
    String(String),
    /// Inline enum value.
    Enum(String),
    /// Reference to an operation variable, by name.
    Variable(String),
}

/// A named field argument.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Argument {
    /// Argument name as it appears in the schema.
    pub name: String,
    /// The supplied value.
    pub value: ArgumentValue,
}

impl Argument {
    /// Creates a named argument.
    pub fn new(name: impl Into<String>, value: ArgumentValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Ordered field arguments.
pub type Arguments = Vec<Argument>;

/// Concrete values for operation variables.
#[derive(Clone, Default, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Variables(BTreeMap<String, ScalarValue>);

impl Variables {
    /// Creates an empty variable map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Looks up a variable by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.0.get(name)
    }

    /// Iterates variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One node of a selection tree.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionNode {
    /// A leaf field.
    Scalar(ScalarSelection),
    /// A field pointing at one record or a list of records.
    Linked(LinkedSelection),
    /// A type refinement; descends only on matching `__typename`.
    InlineFragment(InlineFragment),
}

/// A leaf field selection.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScalarSelection {
    /// Schema field name.
    pub field_name: String,
    /// Field arguments, possibly empty.
    pub arguments: Arguments,
}

/// A selection over a linked field.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkedSelection {
    /// Schema field name.
    pub field_name: String,
    /// Field arguments, possibly empty.
    pub arguments: Arguments,
    /// Statically known target type, when the schema provides one.
    pub concrete_type: Option<TypeName>,
    /// Sub-selections applied to each target record.
    pub selections: Vec<SelectionNode>,
}

/// A type-conditional selection.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InlineFragment {
    /// Type the fragment refines to.
    pub type_condition: TypeName,
    /// Sub-selections applied when the condition matches.
    pub selections: Vec<SelectionNode>,
}

/// A whole selection tree.
pub type SelectionSet = Vec<SelectionNode>;

/// Shorthand constructor for a scalar selection without arguments.
pub fn scalar(field_name: impl Into<String>) -> SelectionNode {
    SelectionNode::Scalar(ScalarSelection {
        field_name: field_name.into(),
        arguments: Vec::new(),
    })
}

/// Shorthand constructor for a scalar selection with arguments.
pub fn scalar_with_args(field_name: impl Into<String>, arguments: Arguments) -> SelectionNode {
    SelectionNode::Scalar(ScalarSelection {
        field_name: field_name.into(),
        arguments,
    })
}

/// Shorthand constructor for a linked selection without arguments.
pub fn linked(field_name: impl Into<String>, selections: Vec<SelectionNode>) -> SelectionNode {
    SelectionNode::Linked(LinkedSelection {
        field_name: field_name.into(),
        arguments: Vec::new(),
        concrete_type: None,
        selections,
    })
}

/// Shorthand constructor for a linked selection with arguments.
pub fn linked_with_args(
    field_name: impl Into<String>,
    arguments: Arguments,
    selections: Vec<SelectionNode>,
) -> SelectionNode {
    SelectionNode::Linked(LinkedSelection {
        field_name: field_name.into(),
        arguments,
        concrete_type: None,
        selections,
    })
}

/// Shorthand constructor for an inline fragment.
pub fn inline_fragment(
    type_condition: impl Into<TypeName>,
    selections: Vec<SelectionNode>,
) -> SelectionNode {
    SelectionNode::InlineFragment(InlineFragment {
        type_condition: type_condition.into(),
        selections,
    })
}

pub(crate) fn argument_key_chunk(value: &ArgumentValue, variables: &Variables) -> String {
    match value {
        ArgumentValue::Literal(v) => v.to_key_chunk(),
        ArgumentValue::String(s) | ArgumentValue::Enum(s) => s.clone(),
        ArgumentValue::Variable(name) => variables
            .get(name)
            .map_or_else(|| "null".to_owned(), ScalarValue::to_key_chunk),
    }
}

/// Derives the storage key for a field: the field name followed by one
/// chunk per argument, with variables substituted by value. A missing
/// variable canonicalizes to `null`.
///
/// Example: `node(id: $id)` with `id = "1"` keys as `node____id___1`.
pub fn storage_key(field_name: &str, arguments: &[Argument], variables: &Variables) -> StorageKey {
    let mut key = field_name.to_owned();
    for argument in arguments {
        key.push_str(ARGUMENT_SEPARATOR);
        key.push_str(&argument.name);
        key.push_str(VALUE_SEPARATOR);
        key.push_str(&argument_key_chunk(&argument.value, variables));
    }
    key
}

/// Derives the key a field occupies in the raw network response. Unlike
/// storage keys, variables stay unsubstituted: each chunk carries a
/// kind prefix (`l_` literal, `s_` string, `e_` enum, `v_` variable
/// name) so the same request shape always produces the same alias.
pub fn response_key(field_name: &str, arguments: &[Argument]) -> String {
    let mut key = field_name.to_owned();
    for argument in arguments {
        let chunk = match &argument.value {
            ArgumentValue::Literal(v) => format!("l_{}", v.to_key_chunk()),
            ArgumentValue::String(s) => format!("s_{s}"),
            ArgumentValue::Enum(e) => format!("e_{e}"),
            ArgumentValue::Variable(name) => format!("v_{name}"),
        };
        key.push_str(ARGUMENT_SEPARATOR);
        key.push_str(&argument.name);
        key.push_str(VALUE_SEPARATOR);
        key.push_str(&chunk);
    }
    key
}

/// Resolves the arguments of a field into a variable map for its
/// sub-tree: literal kinds pass through, variable references are looked
/// up in the parent scope and skipped when absent.
#[must_use]
pub fn child_variables(arguments: &[Argument], variables: &Variables) -> Variables {
    let mut child = Variables::new();
    for argument in arguments {
        match &argument.value {
            ArgumentValue::Literal(v) => {
                child = child.with(argument.name.clone(), v.clone());
            }
            ArgumentValue::String(s) | ArgumentValue::Enum(s) => {
                child = child.with(argument.name.clone(), ScalarValue::String(s.clone()));
            }
            ArgumentValue::Variable(name) => {
                if let Some(v) = variables.get(name) {
                    child = child.with(argument.name.clone(), v.clone());
                }
            }
        }
    }
    child
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_substitutes_variables() {
        let arguments = vec![Argument::new("id", ArgumentValue::Variable("id".into()))];
        let variables = Variables::new().with("id", "1");
        assert_eq!(storage_key("node", &arguments, &variables), "node____id___1");
    }

    #[test]
    fn missing_variable_canonicalizes_to_null() {
        let arguments = vec![Argument::new("id", ArgumentValue::Variable("id".into()))];
        assert_eq!(
            storage_key("node", &arguments, &Variables::new()),
            "node____id___null"
        );
    }

    #[test]
    fn response_key_keeps_variable_names() {
        let arguments = vec![Argument::new("id", ArgumentValue::Variable("id".into()))];
        assert_eq!(response_key("node", &arguments), "node____id___v_id");
    }

    #[test]
    fn chunk_kinds_are_prefixed_in_response_keys() {
        let arguments = vec![
            Argument::new("first", ArgumentValue::Literal(ScalarValue::Int(10))),
            Argument::new("after", ArgumentValue::String("cursor".into())),
            Argument::new("order", ArgumentValue::Enum("ASC".into())),
        ];
        assert_eq!(
            response_key("pullRequests", &arguments),
            "pullRequests____first___l_10____after___s_cursor____order___e_ASC"
        );
        assert_eq!(
            storage_key("pullRequests", &arguments, &Variables::new()),
            "pullRequests____first___10____after___cursor____order___ASC"
        );
    }

    #[test]
    fn same_field_and_args_collide_regardless_of_alias_encoding() {
        let by_literal = vec![Argument::new(
            "id",
            ArgumentValue::Literal(ScalarValue::String("1".into())),
        )];
        let by_variable = vec![Argument::new("id", ArgumentValue::Variable("id".into()))];
        let variables = Variables::new().with("id", "1");
        assert_eq!(
            storage_key("node", &by_literal, &Variables::new()),
            storage_key("node", &by_variable, &variables),
        );
    }

    #[test]
    fn child_variables_resolve_against_parent_scope() {
        let arguments = vec![
            Argument::new("id", ArgumentValue::Variable("outer".into())),
            Argument::new("limit", ArgumentValue::Literal(ScalarValue::Int(5))),
            Argument::new("missing", ArgumentValue::Variable("absent".into())),
        ];
        let variables = Variables::new().with("outer", "42");
        let child = child_variables(&arguments, &variables);
        assert_eq!(child.get("id"), Some(&ScalarValue::String("42".into())));
        assert_eq!(child.get("limit"), Some(&ScalarValue::Int(5)));
        assert_eq!(child.get("missing"), None);
    }
}
