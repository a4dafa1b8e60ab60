// SPDX-License-Identifier: Apache-2.0
//! Identifier types for normalized records.

use std::fmt;
use std::sync::Arc;

/// Name of the schema type a record belongs to (e.g. `"Economist"`).
///
/// Records are partitioned by type name, so ids only need to be unique
/// within one type. Cheap to clone; comparisons are by string value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TypeName(Arc<str>);

impl TypeName {
    /// Creates a type name from a string.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identifier of a record within its type's partition.
///
/// Ids either come from the data itself (an `id` field in a network
/// response) or are synthesized from the position of an unidentifiable
/// object within its parent (see the normalizer).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DataId(Arc<str>);

/// Well-known id of the singleton root record.
pub const ROOT_ID: &str = "__ROOT";

impl DataId {
    /// Creates a data id from a string.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id of the singleton root record.
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    /// Returns `true` if this is the root record's id.
    #[must_use]
    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT_ID
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DataId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// A typed foreign key: the only way one record refers to another.
///
/// Links are stored as field values and resolved against the store's
/// typename partitions; a link may dangle if its target was never
/// written or has been collected.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// Type partition the target record lives in.
    pub typename: TypeName,
    /// Target record id within that partition.
    pub id: DataId,
}

impl Link {
    /// Creates a link to the record `id` of type `typename`.
    pub fn new(typename: impl Into<TypeName>, id: impl Into<DataId>) -> Self {
        Self {
            typename: typename.into(),
            id: id.into(),
        }
    }

    /// Link to the singleton root record of the given type.
    pub fn root(typename: impl Into<TypeName>) -> Self {
        Self {
            typename: typename.into(),
            id: DataId::root(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.typename, self.id)
    }
}
