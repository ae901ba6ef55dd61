//! Reconciliation errors

use store_client::StoreError;
use thiserror::Error;

/// A creator function could not produce the desired object
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BuildError(String);

impl BuildError {
    /// Wraps a human-readable reason
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by the ensure engine and batch reconcilers
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Creator function failed; fatal for the current pass
    #[error("failed to build {kind} {name}: {source}")]
    Build {
        /// Kind of the object
        kind: String,
        /// `namespace/name` of the object
        name: String,
        /// What the creator reported
        source: BuildError,
    },

    /// Reading the current object failed
    #[error("failed to get {kind} {name}: {source}")]
    Read {
        /// Kind of the object
        kind: String,
        /// `namespace/name` of the object
        name: String,
        /// Underlying store failure
        source: StoreError,
    },

    /// Create, update or delete failed (including version conflicts)
    #[error("failed to ensure {kind} {name}: {source}")]
    Write {
        /// Kind of the object
        kind: String,
        /// `namespace/name` of the object
        name: String,
        /// Underlying store failure
        source: StoreError,
    },
}

impl ReconcileError {
    /// Whether a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Write { source, .. } if source.is_conflict())
    }
}
