// SPDX-License-Identifier: Apache-2.0
//! Raw network response values, before normalization.

use std::collections::BTreeMap;

use crate::selection::{ID_KEY, TYPENAME_KEY};
use crate::value::{PathSegment, ScalarValue};

/// An untyped value in a network response.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseValue {
    /// JSON null.
    Null,
    /// A leaf value.
    Scalar(ScalarValue),
    /// A nested object.
    Object(ResponseObject),
    /// A list of values.
    List(Vec<ResponseValue>),
}

impl ResponseValue {
    /// Returns the object, if this value is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ResponseObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<ScalarValue> for ResponseValue {
    fn from(s: ScalarValue) -> Self {
        Self::Scalar(s)
    }
}

impl From<&str> for ResponseValue {
    fn from(s: &str) -> Self {
        Self::Scalar(ScalarValue::from(s))
    }
}

impl From<i64> for ResponseValue {
    fn from(i: i64) -> Self {
        Self::Scalar(ScalarValue::from(i))
    }
}

impl From<bool> for ResponseValue {
    fn from(b: bool) -> Self {
        Self::Scalar(ScalarValue::from(b))
    }
}

impl From<ResponseObject> for ResponseValue {
    fn from(object: ResponseObject) -> Self {
        Self::Object(object)
    }
}

/// A response object: response keys mapped to values.
#[derive(Clone, Default, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ResponseObject(BTreeMap<String, ResponseValue>);

impl ResponseObject {
    /// Creates an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion under a response key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ResponseValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a value by response key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ResponseValue> {
        self.0.get(key)
    }

    /// The object's `__typename` discriminator, when present.
    #[must_use]
    pub fn typename(&self) -> Option<&str> {
        self.get(TYPENAME_KEY).and_then(|v| match v {
            ResponseValue::Scalar(s) => s.as_str(),
            _ => None,
        })
    }

    /// The object's own `id`, when present. String and integer ids are
    /// both accepted; integers are canonicalized to text.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.get(ID_KEY).and_then(|v| match v {
            ResponseValue::Scalar(s) => Some(s.to_key_chunk()),
            _ => None,
        })
    }

    /// Iterates entries in response-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResponseValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A top-level error returned alongside (or instead of) response data.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResponseError {
    /// Human-readable message from the data source.
    pub message: String,
    /// Path to the field the error applies to, from the response root.
    pub path: Vec<PathSegment>,
}

impl ResponseError {
    /// Creates a response error.
    pub fn new(message: impl Into<String>, path: Vec<PathSegment>) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}
