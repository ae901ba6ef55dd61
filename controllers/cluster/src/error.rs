//! Controller-specific error types.
//!
//! This module defines error types specific to the cluster controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use reconciling::ReconcileError;
use store_client::StoreError;
use thiserror::Error;

/// Errors that can occur in the cluster controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Ensure engine or batch reconciler error
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object is missing data the controller relies on
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Address could not be determined
    #[error("Address error: {0}")]
    Address(String),

    /// DNS lookup failed
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// Cloud provider call failed
    #[error("Cloud provider error: {0}")]
    CloudProvider(String),

    /// Could not build a client for the managed cluster
    #[error("User cluster connection failed: {0}")]
    UserCluster(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error (metrics listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Short machine-readable reason recorded in `status.errorReason`.
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) | ControllerError::Store(_) => "StoreError",
            ControllerError::Reconcile(ReconcileError::Build { .. }) => "BuildError",
            ControllerError::Reconcile(ReconcileError::Read { .. }) => "StoreReadError",
            ControllerError::Reconcile(ReconcileError::Write { .. }) => "StoreWriteError",
            ControllerError::InvalidConfig(_) | ControllerError::InvalidObject(_) => {
                "InvalidConfiguration"
            }
            ControllerError::Address(_) | ControllerError::Dns(_) => "AddressError",
            ControllerError::CloudProvider(_) => "CloudProviderError",
            ControllerError::UserCluster(_) => "UserClusterError",
            ControllerError::Watch(_) | ControllerError::Metrics(_) | ControllerError::Io(_) => {
                "InternalError"
            }
        }
    }
}
