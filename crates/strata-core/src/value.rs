// SPDX-License-Identifier: Apache-2.0
//! Stored field values and record types.

use std::collections::BTreeMap;
use std::fmt;

use crate::ident::Link;

/// A leaf value as it appears in network responses and the store.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarValue {
    /// UTF-8 string.
    String(String),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Boolean.
    Boolean(bool),
}

impl ScalarValue {
    /// Canonical text form, used when a scalar becomes part of a
    /// storage key (argument canonicalization).
    #[must_use]
    pub fn to_key_chunk(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    /// Returns the string payload, if this is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// One step of a path into a response or read-out object.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PathSegment {
    /// Object field, by response key or alias.
    Key(String),
    /// List element index.
    Index(usize),
}

impl PathSegment {
    /// Field segment from a key string.
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A field-level error recorded in the store or surfaced by a read.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldError {
    /// Human-readable message from the data source.
    pub message: String,
    /// Path to the errored field, relative to the response root.
    pub path: Vec<PathSegment>,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(message: impl Into<String>, path: Vec<PathSegment>) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}

/// A value stored under a storage key inside a record.
///
/// The error arm makes fallible fields first-class: a field holds either
/// data or the errors that prevented the data from arriving, never both.
/// Writing a plain value over `Errors` clears the errors, and vice versa.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    /// Confirmed absent (distinct from "never fetched").
    Null,
    /// A leaf value.
    Scalar(ScalarValue),
    /// A list of leaf values.
    ScalarList(Vec<ScalarValue>),
    /// Reference to a single record.
    Link(Link),
    /// References to records; `None` elements are confirmed-null entries.
    LinkList(Vec<Option<Link>>),
    /// The field errored; the data never arrived.
    Errors(Vec<FieldError>),
}

impl FieldValue {
    /// Returns the link, if this value is a singular link.
    #[must_use]
    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    /// Returns the scalar, if this value is a singular scalar.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for the `Errors` arm.
    #[must_use]
    pub fn is_errors(&self) -> bool {
        matches!(self, Self::Errors(_))
    }
}

impl From<ScalarValue> for FieldValue {
    fn from(s: ScalarValue) -> Self {
        Self::Scalar(s)
    }
}

impl From<Link> for FieldValue {
    fn from(link: Link) -> Self {
        Self::Link(link)
    }
}

/// Key of a field slot within a record: the field name plus its
/// canonicalized arguments (see the selection module).
pub type StorageKey = String;

/// A normalized record: storage keys mapped to stored values.
pub type StoreRecord = BTreeMap<StorageKey, FieldValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_chunks_use_canonical_text() {
        assert_eq!(ScalarValue::from("abc").to_key_chunk(), "abc");
        assert_eq!(ScalarValue::from(42_i64).to_key_chunk(), "42");
        assert_eq!(ScalarValue::from(true).to_key_chunk(), "true");
    }

    #[test]
    fn errors_arm_is_distinct_from_null() {
        let errors = FieldValue::Errors(vec![FieldError::new("boom", vec![])]);
        assert!(errors.is_errors());
        assert_ne!(errors, FieldValue::Null);
    }
}
