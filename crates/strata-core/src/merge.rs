// SPDX-License-Identifier: Apache-2.0
//! Structural recycling of read-out values.
//!
//! When a fragment is re-read after a store change, subscribers should
//! only be woken if the data they see actually changed. Recycling
//! rebuilds the new value while sharing every unchanged subtree with
//! the previous one, so "did anything change" collapses to a pointer
//! comparison at the root and memoized consumers keep their identity
//! for untouched branches.

use std::sync::Arc;

use crate::read::{DataObject, DataValue};

/// Merges `new` against `old`, reusing `old`'s containers wherever the
/// contents are structurally equal. The result is equal to `new`; it is
/// [`identical`] to `old` exactly when nothing changed.
#[must_use]
pub fn recycle(old: &DataValue, new: DataValue) -> DataValue {
    match (old, new) {
        (DataValue::Object(old_object), DataValue::Object(new_object)) => {
            let new_object = Arc::unwrap_or_clone(new_object);
            let mut merged = DataObject::new();
            let mut all_recycled = old_object.len() == new_object.len();
            for (key, new_child) in new_object {
                let child = match old_object.get(&key) {
                    Some(old_child) => {
                        let recycled = recycle(old_child, new_child);
                        all_recycled &= identical(old_child, &recycled);
                        recycled
                    }
                    None => {
                        all_recycled = false;
                        new_child
                    }
                };
                merged.insert(key, child);
            }
            if all_recycled {
                old.clone()
            } else {
                DataValue::object(merged)
            }
        }
        (DataValue::List(old_items), DataValue::List(new_items)) => {
            let new_items = Arc::unwrap_or_clone(new_items);
            let mut all_recycled = old_items.len() == new_items.len();
            let mut merged = Vec::with_capacity(new_items.len());
            for (index, new_item) in new_items.into_iter().enumerate() {
                let item = match old_items.get(index) {
                    Some(old_item) => {
                        let recycled = recycle(old_item, new_item);
                        all_recycled &= identical(old_item, &recycled);
                        recycled
                    }
                    None => {
                        all_recycled = false;
                        new_item
                    }
                };
                merged.push(item);
            }
            if all_recycled {
                old.clone()
            } else {
                DataValue::list(merged)
            }
        }
        (DataValue::Loadable(old_loadable), DataValue::Loadable(new_loadable)) => {
            if old_loadable.stable_id == new_loadable.stable_id {
                old.clone()
            } else {
                DataValue::Loadable(new_loadable)
            }
        }
        (old_leaf, new_leaf) => {
            if *old_leaf == new_leaf {
                old_leaf.clone()
            } else {
                new_leaf
            }
        }
    }
}

/// Identity check after recycling: pointer equality for shared
/// containers, value equality for leaves.
#[must_use]
pub fn identical(a: &DataValue, b: &DataValue) -> bool {
    match (a, b) {
        (DataValue::Object(a), DataValue::Object(b)) => Arc::ptr_eq(a, b),
        (DataValue::List(a), DataValue::List(b)) => Arc::ptr_eq(a, b),
        (DataValue::Loadable(a), DataValue::Loadable(b)) => a.stable_id == b.stable_id,
        _ => a == b,
    }
}
