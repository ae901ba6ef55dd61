//! Fleet-wide admission gate
//!
//! Bounds how many clusters converge at the same time. A cluster takes a
//! slot by setting the `UpdateInProgress` condition and gives it back when
//! the health sync finds it healthy.

use crds::{ManagedCluster, condition_types};
use store_client::Store;
use tokio::sync::Mutex;
use tracing::debug;

use super::health::is_healthy;
use super::status::update_cluster;
use crate::error::ControllerError;

#[derive(Debug)]
pub struct AdmissionGate {
    limit: usize,
    /// Serializes count-and-mark so two workers cannot take the last slot
    lock: Mutex<()>,
}

fn holds_slot(cluster: &ManagedCluster) -> bool {
    cluster
        .status
        .as_ref()
        .is_some_and(|s| s.is_condition_true(condition_types::UPDATE_IN_PROGRESS))
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            lock: Mutex::new(()),
        }
    }

    /// Whether `cluster` may run the rest of its pass now.
    pub async fn admit(
        &self,
        store: &Store,
        cluster: &mut ManagedCluster,
    ) -> Result<bool, ControllerError> {
        if holds_slot(cluster) {
            return Ok(true);
        }
        let status = cluster.status_or_default();
        if is_healthy(&status.extended_health, cluster.spec.expose_strategy) {
            return Ok(true);
        }

        let _guard = self.lock.lock().await;
        let in_progress = store
            .list::<ManagedCluster>(None)
            .await?
            .iter()
            .filter(|other| {
                other.metadata.name != cluster.metadata.name
                    && !other.is_deleting()
                    && holds_slot(other)
            })
            .count();
        if in_progress >= self.limit {
            debug!(
                "Cluster {} not admitted: {} of {} update slots taken",
                cluster.metadata.name.as_deref().unwrap_or("<unknown>"),
                in_progress,
                self.limit
            );
            return Ok(false);
        }

        update_cluster(store, cluster, |c| {
            c.status.get_or_insert_with(Default::default).set_condition(
                condition_types::UPDATE_IN_PROGRESS,
                true,
                "Admitted",
                "",
            );
        })
        .await?;
        Ok(true)
    }
}
