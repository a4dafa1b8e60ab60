// SPDX-License-Identifier: Apache-2.0
//! Reader trees: the shape of data handed back to callers.
//!
//! A reader tree differs from a selection tree: it is aliased, it can
//! emit the current record's link, and it can embed computed fields
//! (resolvers) and capability fields (loadables) that have no storage
//! representation of their own.

use std::fmt;
use std::sync::Arc;

use crate::operation::OperationHandle;
use crate::read::DataValue;
use crate::selection::{Arguments, Variables};

/// Computes a derived field from its materialized sub-selection and
/// the child variable scope.
pub type ResolverFn = Arc<dyn Fn(&DataValue, &Variables) -> DataValue>;

/// Starts the external operation behind a loadable field.
pub type LoadFn = Arc<dyn Fn() -> OperationHandle>;

/// One node of a reader tree.
#[derive(Clone)]
pub enum ReaderNode {
    /// A stored leaf value.
    Scalar {
        /// Schema field name (storage identity).
        field_name: String,
        /// Output key override; the field name when absent.
        alias: Option<String>,
        /// Field arguments, folded into the storage key.
        arguments: Arguments,
    },
    /// A stored link followed into the target record(s).
    Linked {
        /// Schema field name (storage identity).
        field_name: String,
        /// Output key override; the field name when absent.
        alias: Option<String>,
        /// Field arguments, folded into the storage key.
        arguments: Arguments,
        /// Sub-tree read from each target record.
        selections: Vec<ReaderNode>,
    },
    /// Emits the link of the record currently being read.
    Link {
        /// Output key.
        alias: String,
    },
    /// A derived field computed by an external function over its
    /// materialized sub-selection.
    Resolver {
        /// Output key.
        alias: String,
        /// Arguments resolved into the child variable scope.
        arguments: Arguments,
        /// Sub-tree materialized and passed to the function.
        selections: Vec<ReaderNode>,
        /// The computing function.
        resolve: ResolverFn,
    },
    /// A capability field: reads out as a stable id plus a factory for
    /// the network operation that would load the full data.
    Loadable {
        /// Output key.
        alias: String,
        /// Field name, part of the stable id.
        name: String,
        /// Arguments resolved into the stable id.
        arguments: Arguments,
        /// Starts the operation when invoked.
        load: LoadFn,
    },
}

impl ReaderNode {
    /// The key this node writes in the output object.
    #[must_use]
    pub fn output_key(&self) -> &str {
        match self {
            Self::Scalar {
                field_name, alias, ..
            }
            | Self::Linked {
                field_name, alias, ..
            } => alias.as_deref().unwrap_or(field_name),
            Self::Link { alias }
            | Self::Resolver { alias, .. }
            | Self::Loadable { alias, .. } => alias,
        }
    }

    /// Scalar leaf without alias or arguments.
    pub fn scalar(field_name: impl Into<String>) -> Self {
        Self::Scalar {
            field_name: field_name.into(),
            alias: None,
            arguments: Arguments::new(),
        }
    }

    /// Scalar leaf with arguments.
    pub fn scalar_with_args(field_name: impl Into<String>, arguments: Arguments) -> Self {
        Self::Scalar {
            field_name: field_name.into(),
            alias: None,
            arguments,
        }
    }

    /// Linked field without alias or arguments.
    pub fn linked(field_name: impl Into<String>, selections: Vec<ReaderNode>) -> Self {
        Self::Linked {
            field_name: field_name.into(),
            alias: None,
            arguments: Arguments::new(),
            selections,
        }
    }

    /// Linked field with arguments.
    pub fn linked_with_args(
        field_name: impl Into<String>,
        arguments: Arguments,
        selections: Vec<ReaderNode>,
    ) -> Self {
        Self::Linked {
            field_name: field_name.into(),
            alias: None,
            arguments,
            selections,
        }
    }

    /// Emits the current record's link under `alias`.
    pub fn link(alias: impl Into<String>) -> Self {
        Self::Link {
            alias: alias.into(),
        }
    }

    /// Derived field computed by `resolve`.
    pub fn resolver(
        alias: impl Into<String>,
        arguments: Arguments,
        selections: Vec<ReaderNode>,
        resolve: ResolverFn,
    ) -> Self {
        Self::Resolver {
            alias: alias.into(),
            arguments,
            selections,
            resolve,
        }
    }

    /// Capability field started by `load`.
    pub fn loadable(
        alias: impl Into<String>,
        name: impl Into<String>,
        arguments: Arguments,
        load: LoadFn,
    ) -> Self {
        Self::Loadable {
            alias: alias.into(),
            name: name.into(),
            arguments,
            load,
        }
    }
}

impl fmt::Debug for ReaderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar {
                field_name, alias, ..
            } => f
                .debug_struct("Scalar")
                .field("field_name", field_name)
                .field("alias", alias)
                .finish_non_exhaustive(),
            Self::Linked {
                field_name,
                alias,
                selections,
                ..
            } => f
                .debug_struct("Linked")
                .field("field_name", field_name)
                .field("alias", alias)
                .field("selections", selections)
                .finish_non_exhaustive(),
            Self::Link { alias } => f.debug_struct("Link").field("alias", alias).finish(),
            Self::Resolver {
                alias, selections, ..
            } => f
                .debug_struct("Resolver")
                .field("alias", alias)
                .field("selections", selections)
                .finish_non_exhaustive(),
            Self::Loadable { alias, name, .. } => f
                .debug_struct("Loadable")
                .field("alias", alias)
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}
