// SPDX-License-Identifier: Apache-2.0
//! Error types for store operations.

use thiserror::Error;

use crate::ident::Link;
use crate::store::LayerId;
use crate::value::StorageKey;

/// A structural invariant was violated. These indicate misuse of the
/// API or a corrupted store and are always propagated, never recovered
/// from mid-operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    /// The layer id does not name a live layer (stale or never issued).
    #[error("layer {layer:?} is not present in the store")]
    UnknownLayer {
        /// The offending id.
        layer: LayerId,
    },
    /// The base layer cannot be removed or spliced.
    #[error("the base layer cannot be removed")]
    BaseLayerImmovable,
    /// A revert was requested on a layer that is not an optimistic one.
    #[error("layer {layer:?} is not an optimistic layer")]
    NotOptimistic {
        /// The offending id.
        layer: LayerId,
    },
    /// A link-valued slot held something other than a link.
    #[error("expected a link at {key:?} on record {record:?}")]
    NonLinkValue {
        /// Record the slot belongs to.
        record: Link,
        /// The offending storage key.
        key: StorageKey,
    },
}

/// Any failure an engine-level operation can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A structural invariant was violated.
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    /// A network response did not match its selection tree.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// The network response did not have the shape the selection tree
/// promised. The write that hit the error is abandoned; previously
/// normalized sibling data stays in the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// An object or list of objects arrived where a scalar was selected.
    #[error("expected a scalar in the response at {key:?}")]
    ScalarExpected {
        /// Response key of the offending field.
        key: String,
    },
    /// A scalar arrived where a linked object was selected.
    #[error("expected an object in the response at {key:?}")]
    ObjectExpected {
        /// Response key of the offending field.
        key: String,
    },
    /// A linked object had no statically known type and no `__typename`.
    #[error("cannot determine the type of the object at {key:?}")]
    MissingTypename {
        /// Response key of the offending field.
        key: String,
    },
}
