//! One-shot fault injection for the mock store.

use kube::api::ApiResource;

use crate::error::StoreError;

/// Store operation a fault is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `Store::get`
    Get,
    /// `Store::list`
    List,
    /// `Store::create`
    Create,
    /// `Store::update`
    Update,
    /// `Store::update_status`
    UpdateStatus,
    /// `Store::delete`
    Delete,
}

#[derive(Debug, Clone)]
enum FaultKind {
    Backend(String),
    Conflict,
}

#[derive(Debug, Clone)]
pub(super) struct Fault {
    op: Operation,
    kind: String,
    fault: FaultKind,
}

impl Fault {
    pub(super) fn backend(op: Operation, kind: &str, message: &str) -> Self {
        Self {
            op,
            kind: kind.to_string(),
            fault: FaultKind::Backend(message.to_string()),
        }
    }

    pub(super) fn conflict(op: Operation, kind: &str) -> Self {
        Self {
            op,
            kind: kind.to_string(),
            fault: FaultKind::Conflict,
        }
    }

    pub(super) fn matches(&self, op: Operation, kind: &str) -> bool {
        self.op == op && self.kind == kind
    }

    pub(super) fn into_error(self, resource: &ApiResource) -> StoreError {
        match self.fault {
            FaultKind::Backend(message) => StoreError::Backend(message),
            FaultKind::Conflict => StoreError::Conflict {
                kind: resource.kind.clone(),
                name: String::new(),
                message: "injected conflict".to_string(),
            },
        }
    }
}
