// SPDX-License-Identifier: Apache-2.0
//! Change-set accumulator: which records an operation touched.

use std::collections::{BTreeMap, BTreeSet};

use crate::ident::{DataId, Link, TypeName};

/// Set of records encountered or changed by an operation, grouped by
/// type name. Deterministically ordered so notification dispatch and
/// test assertions are stable.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct EncounteredIds {
    by_typename: BTreeMap<TypeName, BTreeSet<DataId>>,
}

impl EncounteredIds {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. Returns `true` if it was not already present.
    pub fn insert(&mut self, typename: TypeName, id: DataId) -> bool {
        self.by_typename.entry(typename).or_default().insert(id)
    }

    /// Adds the record a link points at.
    pub fn insert_link(&mut self, link: &Link) -> bool {
        self.insert(link.typename.clone(), link.id.clone())
    }

    /// Returns `true` if the linked record is in the set.
    #[must_use]
    pub fn contains(&self, link: &Link) -> bool {
        self.by_typename
            .get(&link.typename)
            .is_some_and(|ids| ids.contains(&link.id))
    }

    /// Returns `true` if no records are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_typename.values().all(BTreeSet::is_empty)
    }

    /// Total number of recorded records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_typename.values().map(BTreeSet::len).sum()
    }

    /// Moves every entry of `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        for (typename, ids) in other.by_typename {
            self.by_typename.entry(typename).or_default().extend(ids);
        }
    }

    /// Returns `true` if the two sets share at least one record.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        for (typename, ids) in &self.by_typename {
            if let Some(other_ids) = other.by_typename.get(typename) {
                if ids.iter().any(|id| other_ids.contains(id)) {
                    return true;
                }
            }
        }
        false
    }

    /// Iterates records in `(typename, id)` order.
    pub fn iter(&self) -> impl Iterator<Item = Link> + '_ {
        self.by_typename.iter().flat_map(|(typename, ids)| {
            ids.iter().map(move |id| Link {
                typename: typename.clone(),
                id: id.clone(),
            })
        })
    }
}

impl FromIterator<Link> for EncounteredIds {
    fn from_iter<I: IntoIterator<Item = Link>>(iter: I) -> Self {
        let mut set = Self::new();
        for link in iter {
            set.insert_link(&link);
        }
        set
    }
}
