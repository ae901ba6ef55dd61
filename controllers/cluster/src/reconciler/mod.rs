//! Convergence of ManagedClusters.
//!
//! - `pipeline`: the ordered steps of one convergence pass
//! - `deletion`: finalizer-driven cleanup of deleting clusters
//! - `admission`: fleet-wide limit on clusters converging at once
//! - `address`, `health`, `namespace`: status-producing steps
//! - `status`: read-modify-write helper every step writes through

pub mod address;
pub mod admission;
pub mod context;
pub mod deletion;
pub mod health;
pub mod namespace;
pub mod pipeline;
pub mod status;

pub use context::ClusterContext;
pub use status::update_cluster;

use std::sync::Arc;
use std::time::Duration;

use crds::{ManagedCluster, condition_types};
use store_client::Store;
use tracing::{debug, info, warn};

use crate::cloud::CloudProviderRegistry;
use crate::config::ControllerConfig;
use crate::dns::{Resolver, SystemResolver};
use crate::error::ControllerError;
use crate::events::{EventRecorder, EventType};
use crate::resources::{ResourceCatalog, StandardCatalog};
use crate::user_cluster::{KubeconfigConnector, UserClusterConnector};
use admission::AdmissionGate;
use address::SeedSettings;

/// Timeout of calls against a managed cluster's API server
const USER_CLUSTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a pass stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    NotAdmitted,
    AddressPending,
    InfrastructurePending,
    ApiserverPending,
    Unreachable,
    Deleting,
}

/// Outcome of one reconcile call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Every step ran; come back after the resync period
    Converged,
    /// A gate was not satisfied; retry after `after`
    Requeue { after: Duration, reason: RequeueReason },
    /// Nothing to do (cluster gone or paused)
    Skipped,
}

impl Action {
    pub fn requeue(after: Duration, reason: RequeueReason) -> Self {
        Action::Requeue { after, reason }
    }

    pub fn is_not_admitted(&self) -> bool {
        matches!(
            self,
            Action::Requeue {
                reason: RequeueReason::NotAdmitted,
                ..
            }
        )
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Action::Converged => "converged",
            Action::Requeue { .. } => "requeued",
            Action::Skipped => "skipped",
        }
    }
}

/// Reconciles ManagedClusters against the seed object store.
pub struct Reconciler {
    pub(crate) store: Store,
    pub(crate) config: ControllerConfig,
    pub(crate) catalog: Arc<dyn ResourceCatalog>,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) connector: Arc<dyn UserClusterConnector>,
    pub(crate) cloud_providers: CloudProviderRegistry,
    pub(crate) events: Arc<dyn EventRecorder>,
    pub(crate) admission: AdmissionGate,
}

impl Reconciler {
    /// Creates a reconciler with the production collaborators. Events go
    /// through `events`, which needs an API client the store does not expose.
    pub fn new(store: Store, events: Arc<dyn EventRecorder>, config: ControllerConfig) -> Self {
        Self {
            catalog: Arc::new(StandardCatalog),
            resolver: Arc::new(SystemResolver),
            connector: Arc::new(KubeconfigConnector::new(store.clone(), USER_CLUSTER_TIMEOUT)),
            cloud_providers: CloudProviderRegistry::default(),
            events,
            admission: AdmissionGate::new(config.concurrent_cluster_updates),
            store,
            config,
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn UserClusterConnector>) -> Self {
        self.connector = connector;
        self
    }

    #[must_use]
    pub fn with_cloud_providers(mut self, registry: CloudProviderRegistry) -> Self {
        self.cloud_providers = registry;
        self
    }

    pub(crate) fn seed_settings(&self) -> SeedSettings {
        SeedSettings {
            base_domain: self.config.external_url.clone(),
            dns_overwrite: self.config.seed_dns_overwrite.clone(),
            tunneling_agent_ip: self.config.tunneling_agent_ip.clone(),
        }
    }

    /// Runs one pass for the named cluster.
    ///
    /// Errors are recorded on the cluster and published as a Warning event
    /// before they are returned. Deleting clusters never return an error:
    /// the deletion loop always comes back after its fixed delay.
    pub async fn reconcile(&self, name: &str) -> Result<Action, ControllerError> {
        let Some(mut cluster) = self.store.get::<ManagedCluster>(None, name).await? else {
            debug!("Cluster {} no longer exists", name);
            return Ok(Action::Skipped);
        };
        if cluster.spec.pause {
            debug!("Cluster {} is paused, skipping", name);
            return Ok(Action::Skipped);
        }

        match self.converge(&mut cluster).await {
            Ok(action) => {
                // a deferred pass did no work, so it has nothing to clear
                if !action.is_not_admitted() {
                    self.record_success(&mut cluster).await?;
                }
                Ok(action)
            }
            Err(err) => {
                warn!("Failed to reconcile cluster {}: {}", name, err);
                self.events
                    .publish(&cluster, EventType::Warning, "ReconcilingError", &err.to_string())
                    .await;
                if let Err(e) = self.record_error(&mut cluster, &err).await {
                    warn!("Failed to record error on cluster {}: {}", name, e);
                }
                if cluster.is_deleting() {
                    return Ok(Action::requeue(
                        deletion::DELETION_REQUEUE,
                        RequeueReason::Deleting,
                    ));
                }
                Err(err)
            }
        }
    }

    /// Clears a previously recorded error
    async fn record_success(&self, cluster: &mut ManagedCluster) -> Result<(), ControllerError> {
        if released(cluster) {
            return Ok(());
        }
        let result = update_cluster(&self.store, cluster, |c| {
            let status = c.status.get_or_insert_with(Default::default);
            if status.error_reason.is_some() || status.error_message.is_some() {
                info!(
                    "Cluster {} recovered from {}",
                    c.metadata.name.as_deref().unwrap_or("<unknown>"),
                    status.error_reason.as_deref().unwrap_or("an error")
                );
            }
            status.error_reason = None;
            status.error_message = None;
            status.set_condition(condition_types::RECONCILING_SUCCESS, true, "", "");
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(ControllerError::Store(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn record_error(
        &self,
        cluster: &mut ManagedCluster,
        err: &ControllerError,
    ) -> Result<(), ControllerError> {
        if released(cluster) {
            return Ok(());
        }
        let reason = err.reason();
        let message = err.to_string();
        let result = update_cluster(&self.store, cluster, |c| {
            let status = c.status.get_or_insert_with(Default::default);
            status.error_reason = Some(reason.to_string());
            status.error_message = Some(message.clone());
            status.set_condition(condition_types::RECONCILING_SUCCESS, false, reason, &message);
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(ControllerError::Store(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A deleting cluster without finalizers is gone from the store
fn released(cluster: &ManagedCluster) -> bool {
    cluster.is_deleting()
        && cluster
            .metadata
            .finalizers
            .as_ref()
            .is_none_or(Vec::is_empty)
}
