// SPDX-License-Identifier: Apache-2.0
//! Handles for in-flight external operations.
//!
//! The store never talks to a network itself; callers run requests and
//! feed responses in. A handle is the shared token for one such
//! request: it tracks terminal status and owns a cleanup action that
//! runs at most once.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle of an external operation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OperationStatus {
    /// The request has been issued; no outcome yet.
    InFlight,
    /// The request finished and its data has been written.
    Complete,
    /// The request failed; the message is opaque transport detail.
    Errored(String),
}

type Cleanup = Box<dyn FnOnce() + Send>;

struct Inner {
    status: OperationStatus,
    disposed: bool,
    cleanup: Option<Cleanup>,
}

/// Shared handle for one in-flight external operation.
///
/// Disposal is idempotent and safe at any point of the lifecycle: it
/// runs the cleanup once and marks the handle so later writes from the
/// operation can be skipped. Disposal never rolls back data that was
/// already normalized.
#[derive(Clone)]
pub struct OperationHandle {
    inner: Arc<Mutex<Inner>>,
}

impl OperationHandle {
    /// Creates an in-flight handle with no cleanup action.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cleanup_option(None)
    }

    /// Creates an in-flight handle whose cleanup runs on disposal.
    pub fn with_cleanup(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self::with_cleanup_option(Some(Box::new(cleanup)))
    }

    fn with_cleanup_option(cleanup: Option<Cleanup>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: OperationStatus::InFlight,
                disposed: false,
                cleanup,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The operation's current status.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.lock().status.clone()
    }

    /// Marks the operation complete. No effect on a non-in-flight
    /// handle.
    pub fn complete(&self) {
        let mut inner = self.lock();
        if inner.status == OperationStatus::InFlight {
            inner.status = OperationStatus::Complete;
        }
    }

    /// Records a network failure. No effect on a non-in-flight handle.
    pub fn fail(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status == OperationStatus::InFlight {
            inner.status = OperationStatus::Errored(message.into());
        }
    }

    /// The error message, if the operation failed.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        match &self.lock().status {
            OperationStatus::Errored(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Returns `true` once the handle has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Disposes the handle: runs the cleanup (at most once, ever) and
    /// marks the handle so the operation's future writes are dropped by
    /// cooperating callers.
    pub fn dispose(&self) {
        let cleanup = {
            let mut inner = self.lock();
            if inner.disposed {
                None
            } else {
                inner.disposed = true;
                inner.cleanup.take()
            }
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Default for OperationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OperationHandle")
            .field("status", &inner.status)
            .field("disposed", &inner.disposed)
            .finish_non_exhaustive()
    }
}
