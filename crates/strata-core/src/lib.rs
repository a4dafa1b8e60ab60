// SPDX-License-Identifier: Apache-2.0
//! strata-core: a normalized, layered, in-memory cache for graph-shaped
//! data.
//!
//! Network responses are flattened into typed records connected by
//! links. Local updates stack as layers over the settled base, so an
//! optimistic change can be reverted (or replaced by settled data) with
//! every update above it replayed. Subscribers are notified per change
//! set, and retained queries act as the roots for mark-and-sweep
//! collection of the base.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::option_if_let_else,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::similar_names
)]

mod changeset;
mod check;
mod engine;
mod error;
mod gc;
mod ident;
mod merge;
mod normalize;
mod operation;
mod optimistic;
mod read;
mod reader;
mod response;
/// Selection trees, arguments, and storage-key canonicalization.
pub mod selection;
mod store;
mod subscribe;
mod value;

// Re-exports for stable public API
/// Change-set accumulator for dispatch and invalidation.
pub use changeset::EncounteredIds;
/// Presence checking and fetch policies.
pub use check::{check, CheckResult, ShouldFetch};
/// The engine: store, subscriptions, and retained queries in one place.
pub use engine::{Engine, EngineConfig};
/// Error types.
pub use error::{InvariantError, NormalizeError, StoreError};
/// Garbage collection roots and the collection pass.
pub use gc::{collect_garbage, RetainedQuery};
/// Record identity: type names, data ids, and links.
pub use ident::{DataId, Link, TypeName, ROOT_ID};
/// Structural recycling of read-out values.
pub use merge::{identical, recycle};
/// Write-time normalization of network responses.
pub use normalize::normalize_into_layer;
/// Handles for in-flight external operations.
pub use operation::{OperationHandle, OperationStatus};
/// Layer lifecycle: pushing updates and reverting optimistic ones.
pub use optimistic::{
    push_network_response_layer, push_optimistic, revert_optimistic, start_update,
};
/// Materializing reads.
pub use read::{
    read_fragment, DataObject, DataValue, LoadableField, ReadOutcome, WithEncounteredRecords,
};
/// Reader trees.
pub use reader::{LoadFn, ReaderNode, ResolverFn};
/// Network response values as fed to the normalizer.
pub use response::{ResponseError, ResponseObject, ResponseValue};
/// The layered record store.
pub use store::{
    LayerData, LayerId, LayerKind, LayeredStore, RecordView, UpdateFn, VisibleData,
};
/// Subscriptions and dispatch.
pub use subscribe::{
    ChangeWaiter, FragmentCallback, RecordCallback, SubscriptionId, Subscriptions,
};
/// Stored field values and records.
pub use value::{
    FieldError, FieldValue, PathSegment, ScalarValue, StorageKey, StoreRecord,
};
