//! Deletion of ManagedClusters
//!
//! Each pass runs the cleanup unit of the first owned finalizer still
//! present and drops that finalizer once the unit succeeded. The store
//! removes the cluster when its finalizer list is empty.

use std::sync::Arc;
use std::time::Duration;

use crds::{BackupConfig, ManagedCluster, finalizers};
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use reconciling::delete_objects_if_present;
use tracing::{debug, info};

use super::{Action, ClusterContext, Reconciler, RequeueReason, update_cluster};
use crate::error::ControllerError;
use crate::resources::names;

/// Delay between deletion passes, whatever their outcome
pub const DELETION_REQUEUE: Duration = Duration::from_secs(10);

impl Reconciler {
    pub(crate) async fn reconcile_deletion(
        &self,
        cluster: &mut ManagedCluster,
    ) -> Result<Action, ControllerError> {
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let Some(token) = finalizers::CLEANUP_ORDER
            .into_iter()
            .find(|token| cluster.has_finalizer(token))
        else {
            debug!("Cluster {} has no cleanup left", name);
            return Ok(Action::Skipped);
        };

        let done = match token {
            finalizers::NODE_DELETION => self.delete_nodes(cluster).await?,
            finalizers::BACKUP_CLEANUP => self.delete_backups(cluster).await?,
            finalizers::CREDENTIALS_CLEANUP => self.delete_credentials(cluster).await?,
            finalizers::CLOUD_INFRASTRUCTURE_CLEANUP => {
                self.cloud_providers.for_cluster(cluster)?.cleanup(cluster).await?;
                true
            }
            _ => self.delete_namespace(cluster).await?,
        };

        if done {
            update_cluster(&self.store, cluster, |c| {
                c.remove_finalizer(token);
            })
            .await?;
            info!("Finished {} for cluster {}", token, name);
        }
        Ok(Action::requeue(DELETION_REQUEUE, RequeueReason::Deleting))
    }

    async fn delete_nodes(&self, cluster: &ManagedCluster) -> Result<bool, ControllerError> {
        let user_cluster = self.connector.connect(cluster).await?;
        let nodes: Vec<Node> = user_cluster.list(None).await?;
        let mut deleted = 0;
        for name in nodes.into_iter().filter_map(|n| n.metadata.name) {
            if user_cluster.delete_if_present::<Node>(None, &name).await? {
                deleted += 1;
            }
        }
        debug!("Deleted {} nodes", deleted);
        Ok(true)
    }

    async fn delete_backups(&self, cluster: &ManagedCluster) -> Result<bool, ControllerError> {
        let namespace = cluster.status_or_default().namespace_name;
        if namespace.is_empty() {
            return Ok(true);
        }
        let backups: Vec<BackupConfig> = self.store.list(Some(&namespace)).await?;
        let backup_names: Vec<String> =
            backups.into_iter().filter_map(|b| b.metadata.name).collect();
        delete_objects_if_present::<BackupConfig>(&self.store, Some(&namespace), &backup_names)
            .await?;
        Ok(true)
    }

    async fn delete_credentials(&self, cluster: &ManagedCluster) -> Result<bool, ControllerError> {
        let Some(reference) = cluster.spec.credentials_reference.as_ref() else {
            return Ok(true);
        };
        let namespace = reference
            .namespace
            .as_deref()
            .unwrap_or(&self.config.credentials_namespace);
        self.store
            .delete_if_present::<Secret>(Some(namespace), &reference.name)
            .await?;
        Ok(true)
    }

    /// Deletes the cluster-scoped objects the store does not cascade, then
    /// the namespace. Done once the namespace is gone.
    async fn delete_namespace(&self, cluster: &ManagedCluster) -> Result<bool, ControllerError> {
        let namespace = cluster.status_or_default().namespace_name;
        if namespace.is_empty() {
            return Ok(true);
        }

        let ctx = Arc::new(ClusterContext::new(cluster, &self.config)?);
        let bindings = names(&self.catalog.cluster_role_bindings(&ctx));
        delete_objects_if_present::<ClusterRoleBinding>(&self.store, None, &bindings).await?;

        self.store.delete_if_present::<Namespace>(None, &namespace).await?;
        let gone = self.store.get::<Namespace>(None, &namespace).await?.is_none();
        if !gone {
            debug!("Namespace {} is still terminating", namespace);
        }
        Ok(gone)
    }
}
