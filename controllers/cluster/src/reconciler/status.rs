//! Read-modify-write of ManagedCluster objects.

use crds::ManagedCluster;
use store_client::Store;
use tracing::debug;

use crate::error::ControllerError;

/// Applies `modify` to `cluster` and persists what changed.
///
/// Metadata and spec go through a regular update, status through the
/// status subresource; each write happens only when its part differs, and
/// both are guarded by the resourceVersion `cluster` was read at. On
/// return `cluster` holds the stored state. Returns whether anything was
/// written.
pub async fn update_cluster<F>(
    store: &Store,
    cluster: &mut ManagedCluster,
    modify: F,
) -> Result<bool, ControllerError>
where
    F: FnOnce(&mut ManagedCluster),
{
    let original = cluster.clone();
    modify(cluster);

    let mut written = false;
    if original.metadata != cluster.metadata || original.spec != cluster.spec {
        let desired_status = cluster.status.take();
        let mut updated = store.update(&*cluster).await?;
        updated.status = desired_status;
        *cluster = updated;
        written = true;

        // dropping the last finalizer of a deleting object removes it
        let finalizers_gone = cluster
            .metadata
            .finalizers
            .as_ref()
            .is_none_or(Vec::is_empty);
        if cluster.is_deleting() && finalizers_gone {
            debug!(
                "Cluster {} released its last finalizer",
                cluster.metadata.name.as_deref().unwrap_or("<unknown>")
            );
            return Ok(true);
        }
    }

    if original.status != cluster.status {
        *cluster = store.update_status(&*cluster).await?;
        written = true;
    }

    Ok(written)
}
