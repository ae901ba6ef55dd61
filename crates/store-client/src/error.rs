//! Object store errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Resource version mismatch or name collision
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing required identity fields
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// Backend unavailable or failed for another reason
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Maps HTTP 404/409 API responses onto the dedicated variants.
    pub fn from_kube(error: kube::Error, kind: &str, name: &str) -> Self {
        match error {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message.clone(),
            },
            other => StoreError::Kube(other),
        }
    }

    /// The addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Already exists, or the resourceVersion guard failed
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
