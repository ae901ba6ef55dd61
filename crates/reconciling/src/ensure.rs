//! Ensure engine: create-or-update with at most one write.

use kube::Resource;
use store_client::Store;
use tracing::{debug, info};

use crate::compare::semantically_equal;
use crate::creator::ObjectCreator;
use crate::error::ReconcileError;
use crate::kind::ManagedKind;

/// What a single ensure call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Stored object already matched; nothing was written
    Unchanged,
    /// Object was missing and has been created
    Created,
    /// Object drifted and has been updated
    Updated,
}

fn display_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// Drives one object towards the state produced by `create`.
///
/// The current object (or `K::blank()` when absent) is passed to `create`;
/// the engine then forces name and namespace, compares semantically and
/// issues zero or one write. Updates carry the resourceVersion that was
/// read, so a concurrent writer surfaces as a conflict instead of being
/// overwritten.
pub async fn ensure_named_object<K: ManagedKind>(
    store: &Store,
    namespace: Option<&str>,
    name: &str,
    create: &ObjectCreator<K>,
) -> Result<EnsureOutcome, ReconcileError> {
    let kind = K::kind(&()).to_string();
    let object_name = display_name(namespace, name);

    let current = store
        .get::<K>(namespace, name)
        .await
        .map_err(|source| ReconcileError::Read {
            kind: kind.clone(),
            name: object_name.clone(),
            source,
        })?;

    let base = current.clone().unwrap_or_else(K::blank);
    let mut desired = create(base).map_err(|source| ReconcileError::Build {
        kind: kind.clone(),
        name: object_name.clone(),
        source,
    })?;
    desired.meta_mut().name = Some(name.to_string());
    desired.meta_mut().namespace = namespace.map(str::to_string);

    let Some(current) = current else {
        desired.meta_mut().resource_version = None;
        store
            .create(&desired)
            .await
            .map_err(|source| ReconcileError::Write {
                kind: kind.clone(),
                name: object_name.clone(),
                source,
            })?;
        info!("Created {} {}", kind, object_name);
        return Ok(EnsureOutcome::Created);
    };

    if semantically_equal(&current, &desired) {
        debug!("{} {} is up to date", kind, object_name);
        return Ok(EnsureOutcome::Unchanged);
    }

    desired
        .meta_mut()
        .resource_version
        .clone_from(&current.meta().resource_version);
    store
        .update(&desired)
        .await
        .map_err(|source| ReconcileError::Write {
            kind: kind.clone(),
            name: object_name.clone(),
            source,
        })?;
    info!("Updated {} {}", kind, object_name);
    Ok(EnsureOutcome::Updated)
}
