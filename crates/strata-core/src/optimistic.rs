// SPDX-License-Identifier: Apache-2.0
//! Layer lifecycle: pushing updates and reverting optimistic ones.
//!
//! The chain invariant maintained here: everything below the deepest
//! optimistic layer is settled data, so after every revert the base's
//! child is either an optimistic layer or nothing. Network responses
//! land in the base directly while no overlay exists; local updates
//! always get a layer of their own so they can be replayed or reverted.

use std::sync::Arc;

use tracing::debug;

use crate::changeset::EncounteredIds;
use crate::error::InvariantError;
use crate::store::{LayerId, LayerKind, LayeredStore, UpdateFn, VisibleData};

/// Picks the layer a normalized network response should be written
/// into. While the chain is just the base, responses go straight into
/// it; an existing top network-response layer is reused; otherwise a
/// fresh layer goes on top.
pub fn push_network_response_layer(store: &mut LayeredStore) -> LayerId {
    let current = store.current();
    let reusable = matches!(
        store.kind(current),
        Ok(LayerKind::Base | LayerKind::NetworkResponse)
    );
    if reusable {
        current
    } else {
        store.push(LayerKind::NetworkResponse)
    }
}

/// Applies a replayable local update. Consecutive updates compose into
/// one layer: the layer's data is rebuilt by running the existing
/// update followed by the new one, and the composed function is what
/// future replays run.
pub fn start_update(
    store: &mut LayeredStore,
    update: UpdateFn,
) -> Result<EncounteredIds, InvariantError> {
    let current = store.current();
    let existing = match store.kind(current)? {
        LayerKind::StartUpdate(f) => Some(Arc::clone(f)),
        _ => None,
    };
    if let Some(existing) = existing {
        let composed: UpdateFn = Arc::new(move |store, layer| {
            let mut ids = existing(store, layer);
            ids.merge(update(store, layer));
            ids
        });
        store.set_kind(current, LayerKind::StartUpdate(Arc::clone(&composed)))?;
        store.clear(current)?;
        Ok(composed(store, current))
    } else {
        let layer = store.push(LayerKind::StartUpdate(Arc::clone(&update)));
        Ok(update(store, layer))
    }
}

/// Pushes an optimistic layer, runs its update, and returns the layer
/// id for a later revert together with the records the update touched.
pub fn push_optimistic(store: &mut LayeredStore, update: UpdateFn) -> (LayerId, EncounteredIds) {
    let layer = store.push(LayerKind::Optimistic(Arc::clone(&update)));
    let ids = update(store, layer);
    debug!(?layer, touched = ids.len(), "pushed optimistic layer");
    (layer, ids)
}

/// Reverts an optimistic layer, optionally replacing it with settled
/// data (the network response the optimistic update anticipated).
///
/// Updates stacked above the reverted layer are replayed against the
/// data that is now underneath them; network-response layers above it
/// keep their data untouched. Afterwards adjacent network-response
/// layers coalesce and everything settled folds into the base, so the
/// chain stays minimal. Returns the records whose visible value
/// changed.
pub fn revert_optimistic(
    store: &mut LayeredStore,
    node: LayerId,
    replacement: Option<UpdateFn>,
) -> Result<EncounteredIds, InvariantError> {
    if !store.kind(node)?.is_optimistic() {
        return Err(InvariantError::NotOptimistic { layer: node });
    }
    let before = store.visible_data(store.current())?;

    store.clear(node)?;
    if let Some(replacement) = replacement {
        let settled = store.insert_above(node, LayerKind::NetworkResponse)?;
        let _ = replacement(store, settled);
    }

    // Replay everything stacked above, bottom-up, against the new
    // underlying data.
    let mut descendants = Vec::new();
    let mut cursor = store.child(node)?;
    while let Some(id) = cursor {
        descendants.push(id);
        cursor = store.child(id)?;
    }
    for id in descendants {
        let Some(update) = store.kind(id)?.update_fn() else {
            continue;
        };
        store.clear(id)?;
        let _ = update(store, id);
    }

    store.splice(node)?;
    coalesce_network_responses(store)?;
    fold_settled_into_base(store)?;

    let after = store.visible_data(store.current())?;
    let changed = diff_visible(&before, &after);
    debug!(?node, changed = changed.len(), "reverted optimistic layer");
    Ok(changed)
}

fn coalesce_network_responses(store: &mut LayeredStore) -> Result<(), InvariantError> {
    let mut cursor = store.base();
    loop {
        let Some(child) = store.child(cursor)? else {
            return Ok(());
        };
        if store.kind(cursor)?.is_network_response() && store.kind(child)?.is_network_response() {
            store.merge_into_parent(child)?;
        } else {
            cursor = child;
        }
    }
}

fn fold_settled_into_base(store: &mut LayeredStore) -> Result<(), InvariantError> {
    loop {
        let Some(child) = store.child(store.base())? else {
            return Ok(());
        };
        if store.kind(child)?.is_optimistic() {
            return Ok(());
        }
        store.merge_into_parent(child)?;
    }
}

/// Records whose merged view differs between two snapshots: removed,
/// added, or changed.
fn diff_visible(before: &VisibleData, after: &VisibleData) -> EncounteredIds {
    let mut changed = EncounteredIds::new();
    for (typename, records) in before {
        for (id, record) in records {
            if after.get(typename).and_then(|r| r.get(id)) != Some(record) {
                changed.insert(typename.clone(), id.clone());
            }
        }
    }
    for (typename, records) in after {
        for id in records.keys() {
            if before.get(typename).and_then(|r| r.get(id)).is_none() {
                changed.insert(typename.clone(), id.clone());
            }
        }
    }
    changed
}
