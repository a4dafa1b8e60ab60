// SPDX-License-Identifier: Apache-2.0
//! The layered store: a base layer plus a single stack of overlays.
//!
//! Layers form a parent/child chain with the base at the bottom and the
//! current (child-most) layer at the top. Reads walk the chain from a
//! layer toward the base; writes target exactly one layer. Layers live
//! in a generation-stamped slot arena, so handles held across a splice
//! or merge are detected as stale instead of aliasing a reused slot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::changeset::EncounteredIds;
use crate::error::InvariantError;
use crate::ident::{DataId, Link, TypeName};
use crate::value::{FieldValue, StorageKey, StoreRecord};

/// A replayable store mutation. The function receives the store and the
/// layer it owns: reads go through the chain anchored at that layer,
/// writes land in it. Reverting an ancestor re-runs the function.
pub type UpdateFn = Arc<dyn Fn(&mut LayeredStore, LayerId) -> EncounteredIds>;

/// What kind of writes a layer holds.
#[derive(Clone)]
pub enum LayerKind {
    /// The bottom layer; authoritative, long-lived data.
    Base,
    /// Normalized network response data.
    NetworkResponse,
    /// A local update, replayed when the data under it changes.
    StartUpdate(UpdateFn),
    /// A revertible local update.
    Optimistic(UpdateFn),
}

impl LayerKind {
    /// Short name for logs and assertions.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::NetworkResponse => "network_response",
            Self::StartUpdate(_) => "start_update",
            Self::Optimistic(_) => "optimistic",
        }
    }

    /// Returns `true` for optimistic layers.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic(_))
    }

    /// Returns `true` for network response layers.
    #[must_use]
    pub fn is_network_response(&self) -> bool {
        matches!(self, Self::NetworkResponse)
    }

    /// Returns `true` for start-update layers.
    #[must_use]
    pub fn is_start_update(&self) -> bool {
        matches!(self, Self::StartUpdate(_))
    }

    /// Returns the update function carried by this layer, if any.
    #[must_use]
    pub fn update_fn(&self) -> Option<UpdateFn> {
        match self {
            Self::StartUpdate(f) | Self::Optimistic(f) => Some(Arc::clone(f)),
            _ => None,
        }
    }
}

impl fmt::Debug for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generation-stamped handle to a layer slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LayerId {
    index: u32,
    generation: u32,
}

/// One layer's writes, partitioned by type name. `None` for a record is
/// a tombstone: the record is known absent from this layer up, hiding
/// anything the parents hold.
pub type LayerData = BTreeMap<TypeName, BTreeMap<DataId, Option<StoreRecord>>>;

/// The chain-merged view of one record.
#[derive(Clone, PartialEq, Debug)]
pub enum RecordView {
    /// No layer has ever written this record.
    Missing,
    /// The record is known to be absent (tombstoned).
    Absent,
    /// The record exists; fields merged across the chain, child wins.
    Record(StoreRecord),
}

impl RecordView {
    /// Returns the merged record, if one exists.
    #[must_use]
    pub fn into_record(self) -> Option<StoreRecord> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Returns `true` if no layer has ever written the record.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

struct LayerSlot {
    kind: LayerKind,
    data: LayerData,
    parent: Option<LayerId>,
    child: Option<LayerId>,
}

/// A fully merged snapshot of the records visible at some layer.
pub type VisibleData = BTreeMap<TypeName, BTreeMap<DataId, StoreRecord>>;

/// The layered record store.
pub struct LayeredStore {
    slots: Vec<Option<LayerSlot>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    base: LayerId,
    current: LayerId,
}

impl LayeredStore {
    /// Creates a store whose base layer holds an empty root record of
    /// the given type.
    pub fn new(root_typename: &TypeName) -> Self {
        let mut store = Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            base: LayerId {
                index: 0,
                generation: 0,
            },
            current: LayerId {
                index: 0,
                generation: 0,
            },
        };
        let base = store.alloc(LayerKind::Base, None);
        store.base = base;
        store.current = base;
        if let Ok(slot) = store.slot_mut(base) {
            slot.data
                .entry(root_typename.clone())
                .or_default()
                .insert(DataId::root(), Some(StoreRecord::new()));
        }
        store
    }

    fn alloc(&mut self, kind: LayerKind, parent: Option<LayerId>) -> LayerId {
        let slot = LayerSlot {
            kind,
            data: LayerData::new(),
            parent,
            child: None,
        };
        if let Some(index) = self.free.pop() {
            let id = LayerId {
                index,
                generation: self.generations[index as usize],
            };
            self.slots[index as usize] = Some(slot);
            id
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(slot));
            self.generations.push(0);
            LayerId {
                index,
                generation: 0,
            }
        }
    }

    fn release(&mut self, id: LayerId) {
        let index = id.index as usize;
        if index < self.slots.len() {
            self.slots[index] = None;
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.free.push(id.index);
        }
    }

    fn slot(&self, id: LayerId) -> Result<&LayerSlot, InvariantError> {
        let index = id.index as usize;
        if index < self.slots.len() && self.generations[index] == id.generation {
            if let Some(slot) = &self.slots[index] {
                return Ok(slot);
            }
        }
        Err(InvariantError::UnknownLayer { layer: id })
    }

    fn slot_mut(&mut self, id: LayerId) -> Result<&mut LayerSlot, InvariantError> {
        let index = id.index as usize;
        if index < self.slots.len() && self.generations[index] == id.generation {
            if let Some(slot) = &mut self.slots[index] {
                return Ok(slot);
            }
        }
        Err(InvariantError::UnknownLayer { layer: id })
    }

    /// The base layer's id.
    #[must_use]
    pub fn base(&self) -> LayerId {
        self.base
    }

    /// The current (child-most) layer's id.
    #[must_use]
    pub fn current(&self) -> LayerId {
        self.current
    }

    /// Returns `true` if the id names a live layer.
    #[must_use]
    pub fn contains(&self, id: LayerId) -> bool {
        self.slot(id).is_ok()
    }

    /// The layer's kind.
    pub fn kind(&self, id: LayerId) -> Result<&LayerKind, InvariantError> {
        Ok(&self.slot(id)?.kind)
    }

    /// Replaces the layer's kind, keeping its data and position.
    pub fn set_kind(&mut self, id: LayerId, kind: LayerKind) -> Result<(), InvariantError> {
        self.slot_mut(id)?.kind = kind;
        Ok(())
    }

    /// The layer's parent, `None` for the base.
    pub fn parent(&self, id: LayerId) -> Result<Option<LayerId>, InvariantError> {
        Ok(self.slot(id)?.parent)
    }

    /// The layer's child, `None` for the current layer.
    pub fn child(&self, id: LayerId) -> Result<Option<LayerId>, InvariantError> {
        Ok(self.slot(id)?.child)
    }

    /// Pushes a new layer on top of the current one and makes it
    /// current.
    pub fn push(&mut self, kind: LayerKind) -> LayerId {
        let current = self.current;
        let id = self.alloc(kind, Some(current));
        if let Ok(slot) = self.slot_mut(current) {
            slot.child = Some(id);
        }
        self.current = id;
        id
    }

    /// Inserts a new layer directly above `parent`, between it and its
    /// existing child (if any).
    pub fn insert_above(
        &mut self,
        parent: LayerId,
        kind: LayerKind,
    ) -> Result<LayerId, InvariantError> {
        let old_child = self.slot(parent)?.child;
        let id = self.alloc(kind, Some(parent));
        if let Ok(slot) = self.slot_mut(id) {
            slot.child = old_child;
        }
        self.slot_mut(parent)?.child = Some(id);
        if let Some(child) = old_child {
            self.slot_mut(child)?.parent = Some(id);
        } else {
            self.current = id;
        }
        Ok(id)
    }

    /// Removes a layer from the chain, reconnecting its parent and
    /// child. The layer's data is dropped; its id becomes stale.
    pub fn splice(&mut self, id: LayerId) -> Result<(), InvariantError> {
        let slot = self.slot(id)?;
        let parent = slot.parent.ok_or(InvariantError::BaseLayerImmovable)?;
        let child = slot.child;
        self.slot_mut(parent)?.child = child;
        if let Some(child) = child {
            self.slot_mut(child)?.parent = Some(parent);
        } else {
            self.current = parent;
        }
        self.release(id);
        Ok(())
    }

    /// Drops all of a layer's writes, keeping the layer in place.
    pub fn clear(&mut self, id: LayerId) -> Result<(), InvariantError> {
        self.slot_mut(id)?.data.clear();
        Ok(())
    }

    /// Merges a layer's writes into its parent (this layer wins per
    /// field) and splices the layer out.
    pub fn merge_into_parent(&mut self, id: LayerId) -> Result<(), InvariantError> {
        let parent = self
            .slot(id)?
            .parent
            .ok_or(InvariantError::BaseLayerImmovable)?;
        let data = std::mem::take(&mut self.slot_mut(id)?.data);
        {
            let parent_slot = self.slot_mut(parent)?;
            for (typename, by_id) in data {
                let bucket = parent_slot.data.entry(typename).or_default();
                for (record_id, entry) in by_id {
                    match entry {
                        None => {
                            bucket.insert(record_id, None);
                        }
                        Some(record) => {
                            if let Some(Some(existing)) = bucket.get_mut(&record_id) {
                                existing.extend(record);
                            } else {
                                bucket.insert(record_id, Some(record));
                            }
                        }
                    }
                }
            }
        }
        self.splice(id)
    }

    /// Reads one field through the chain anchored at `layer`. The first
    /// layer that defines the slot wins; a tombstoned record hides
    /// everything below it.
    pub fn field(
        &self,
        layer: LayerId,
        link: &Link,
        key: &str,
    ) -> Result<Option<&FieldValue>, InvariantError> {
        let mut cursor = Some(layer);
        while let Some(id) = cursor {
            let slot = self.slot(id)?;
            if let Some(entry) = slot
                .data
                .get(&link.typename)
                .and_then(|by_id| by_id.get(&link.id))
            {
                match entry {
                    None => return Ok(None),
                    Some(record) => {
                        if let Some(value) = record.get(key) {
                            return Ok(Some(value));
                        }
                    }
                }
            }
            cursor = slot.parent;
        }
        Ok(None)
    }

    /// The chain-merged view of one record at `layer`.
    pub fn record(&self, layer: LayerId, link: &Link) -> Result<RecordView, InvariantError> {
        let mut overlays: Vec<&StoreRecord> = Vec::new();
        let mut cursor = Some(layer);
        let mut tombstoned = false;
        while let Some(id) = cursor {
            let slot = self.slot(id)?;
            if let Some(entry) = slot
                .data
                .get(&link.typename)
                .and_then(|by_id| by_id.get(&link.id))
            {
                match entry {
                    None => {
                        tombstoned = true;
                        break;
                    }
                    Some(record) => overlays.push(record),
                }
            }
            cursor = slot.parent;
        }
        if overlays.is_empty() {
            return Ok(if tombstoned {
                RecordView::Absent
            } else {
                RecordView::Missing
            });
        }
        let mut merged = StoreRecord::new();
        for overlay in overlays.iter().rev() {
            for (key, value) in *overlay {
                merged.insert(key.clone(), value.clone());
            }
        }
        Ok(RecordView::Record(merged))
    }

    /// Gives mutable access to a record's overlay in exactly `layer`,
    /// creating an empty overlay (and replacing a tombstone) if needed.
    pub fn record_mut(
        &mut self,
        layer: LayerId,
        link: &Link,
    ) -> Result<&mut StoreRecord, InvariantError> {
        let slot = self.slot_mut(layer)?;
        let entry = slot
            .data
            .entry(link.typename.clone())
            .or_default()
            .entry(link.id.clone())
            .or_insert_with(|| Some(StoreRecord::new()));
        if entry.is_none() {
            *entry = Some(StoreRecord::new());
        }
        match entry {
            Some(record) => Ok(record),
            // Unreachable: replaced above.
            None => Err(InvariantError::UnknownLayer { layer }),
        }
    }

    /// Writes one field into exactly `layer`.
    pub fn write_field(
        &mut self,
        layer: LayerId,
        link: &Link,
        key: impl Into<StorageKey>,
        value: FieldValue,
    ) -> Result<(), InvariantError> {
        self.record_mut(layer, link)?.insert(key.into(), value);
        Ok(())
    }

    /// Tombstones a record in exactly `layer`: from that layer up the
    /// record is known absent.
    pub fn delete_record(&mut self, layer: LayerId, link: &Link) -> Result<(), InvariantError> {
        self.slot_mut(layer)?
            .data
            .entry(link.typename.clone())
            .or_default()
            .insert(link.id.clone(), None);
        Ok(())
    }

    /// A fully merged snapshot of everything visible at `layer`.
    pub fn visible_data(&self, layer: LayerId) -> Result<VisibleData, InvariantError> {
        let mut chain = Vec::new();
        let mut cursor = Some(layer);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.slot(id)?.parent;
        }
        let mut merged = VisibleData::new();
        for id in chain.into_iter().rev() {
            let slot = self.slot(id)?;
            for (typename, by_id) in &slot.data {
                for (record_id, entry) in by_id {
                    match entry {
                        None => {
                            if let Some(bucket) = merged.get_mut(typename) {
                                bucket.remove(record_id);
                            }
                        }
                        Some(record) => {
                            merged
                                .entry(typename.clone())
                                .or_default()
                                .entry(record_id.clone())
                                .or_default()
                                .extend(record.clone());
                        }
                    }
                }
            }
        }
        merged.retain(|_, bucket| !bucket.is_empty());
        Ok(merged)
    }

    /// Removes base-layer entries the predicate rejects, dropping empty
    /// type buckets. Returns the number of entries removed.
    pub fn sweep_base(&mut self, keep: impl Fn(&TypeName, &DataId) -> bool) -> usize {
        let base = self.base;
        let Ok(slot) = self.slot_mut(base) else {
            return 0;
        };
        let mut removed = 0;
        for (typename, by_id) in &mut slot.data {
            let before = by_id.len();
            by_id.retain(|id, _| keep(typename, id));
            removed += before - by_id.len();
        }
        slot.data.retain(|_, by_id| !by_id.is_empty());
        removed
    }

    /// Layer ids from the base to the current layer, in order.
    #[must_use]
    pub fn chain(&self) -> Vec<LayerId> {
        let mut out = Vec::new();
        let mut cursor = Some(self.base);
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.slot(id).ok().and_then(|slot| slot.child);
        }
        out
    }
}

impl fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&'static str> = self
            .chain()
            .into_iter()
            .filter_map(|id| self.kind(id).ok().map(LayerKind::name))
            .collect();
        f.debug_struct("LayeredStore").field("chain", &kinds).finish()
    }
}
