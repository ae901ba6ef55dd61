//! Kubernetes resource watchers.
//!
//! ManagedClusters are reconciled through `kube_runtime::Controller`. The
//! controller watches every kind the pipeline writes and maps changes back
//! to the owning cluster, so a deleted or modified child triggers a pass.
//! At most one pass per cluster is in flight at any time.
//!
//! Children are mapped through `watches` to namespace-less references:
//! ManagedClusters are cluster-scoped even when their children are not.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crds::{BackupConfig, GROUP, ManagedCluster, VerticalPodAutoscaler};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{
    Controller, watcher,
    controller::{Action as ControllerAction, Config as RuntimeConfig},
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffStates;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{Action, Reconciler};

/// Error backoff bounds
const ERROR_BACKOFF_MIN: Duration = Duration::from_secs(5);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Label every cluster-scoped object created for a cluster carries
const CLUSTER_LABEL: &str = "cluster";

/// State shared by the reconcile and error policy functions
pub struct ReconcileContext {
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    backoff: BackoffStates,
    resync_period: Duration,
}

impl ReconcileContext {
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<Metrics>, resync_period: Duration) -> Self {
        Self {
            reconciler,
            metrics,
            backoff: BackoffStates::new(ERROR_BACKOFF_MIN, ERROR_BACKOFF_MAX),
            resync_period,
        }
    }
}

/// Maps the outcome of a pass to when the controller should come back.
///
/// Converged clusters come back after the resync period, gated ones after
/// the gate's delay. Skipped clusters wait for their next change.
pub fn requeue_action(action: Action, resync_period: Duration) -> ControllerAction {
    match action {
        Action::Converged => ControllerAction::requeue(resync_period),
        Action::Requeue { after, .. } => ControllerAction::requeue(after),
        Action::Skipped => ControllerAction::await_change(),
    }
}

/// ManagedCluster named in an object's owner references, if any.
///
/// The owner is cluster-scoped, so the reference carries no namespace even
/// when the child is namespaced.
pub fn owning_cluster(meta: &ObjectMeta) -> Option<ObjectRef<ManagedCluster>> {
    let kind = ManagedCluster::kind(&());
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.kind == kind && owner.api_version.starts_with(GROUP))
        .map(|owner| ObjectRef::new(&owner.name))
}

/// Triggers a pass of the owning cluster whenever a `K` changes.
fn watch_owned<K>(controller: Controller<ManagedCluster>, client: &Client) -> Controller<ManagedCluster>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    controller.watches(
        Api::<K>::all(client.clone()),
        watcher::Config::default(),
        |object: K| owning_cluster(object.meta()),
    )
}

/// Cluster a cluster-scoped child belongs to. Owner references cannot
/// point from cluster-scoped objects into the cluster namespace, so these
/// children carry the cluster name as a label instead.
pub fn labelled_cluster(binding: &ClusterRoleBinding) -> Option<ObjectRef<ManagedCluster>> {
    binding
        .labels()
        .get(CLUSTER_LABEL)
        .map(|name| ObjectRef::new(name))
}

async fn reconcile(
    cluster: Arc<ManagedCluster>,
    ctx: Arc<ReconcileContext>,
) -> Result<ControllerAction, ControllerError> {
    let name = cluster.name_any();
    let started = Instant::now();
    let action = ctx.reconciler.reconcile(&name).await?;
    let elapsed = started.elapsed();

    ctx.backoff.reset(&name);
    ctx.metrics.observe_reconcile(action.label(), elapsed);
    if action.is_not_admitted() {
        ctx.metrics.inc_admission_rejected();
    }
    debug!("Cluster {} pass finished in {:?}: {:?}", name, elapsed, action);
    Ok(requeue_action(action, ctx.resync_period))
}

/// Retries a failed pass after the cluster's next Fibonacci delay.
fn error_policy(
    cluster: Arc<ManagedCluster>,
    error: &ControllerError,
    ctx: Arc<ReconcileContext>,
) -> ControllerAction {
    let name = cluster.name_any();
    let delay = ctx.backoff.next_for(&name);
    ctx.metrics.inc_reconcile_error();
    warn!("Reconcile of cluster {} failed, retrying in {:?}: {}", name, delay, error);
    ControllerAction::requeue(delay)
}

/// Runs the ManagedCluster controller until its watch streams end.
pub async fn watch_clusters(
    client: Client,
    config: &ControllerConfig,
    ctx: Arc<ReconcileContext>,
) -> Result<(), ControllerError> {
    info!("Starting ManagedCluster controller");

    let concurrency = u16::try_from(config.worker_count).unwrap_or(u16::MAX);
    let mut controller = Controller::new(
        Api::<ManagedCluster>::all(client.clone()),
        watcher::Config::default(),
    );
    controller = watch_owned::<Namespace>(controller, &client);
    controller = watch_owned::<Service>(controller, &client);
    controller = watch_owned::<Secret>(controller, &client);
    controller = watch_owned::<ConfigMap>(controller, &client);
    controller = watch_owned::<ServiceAccount>(controller, &client);
    controller = watch_owned::<Role>(controller, &client);
    controller = watch_owned::<RoleBinding>(controller, &client);
    controller = watch_owned::<StatefulSet>(controller, &client);
    controller = watch_owned::<Deployment>(controller, &client);
    controller = watch_owned::<CronJob>(controller, &client);
    controller = watch_owned::<PodDisruptionBudget>(controller, &client);
    // optional kinds are only watched when their CRDs are expected to exist
    if config.enable_vpa {
        controller = watch_owned::<VerticalPodAutoscaler>(controller, &client);
    }
    if config.enable_etcd_backups {
        controller = watch_owned::<BackupConfig>(controller, &client);
    }
    controller = controller.watches(
        Api::<ClusterRoleBinding>::all(client),
        watcher::Config::default().labels(CLUSTER_LABEL),
        |binding| labelled_cluster(&binding),
    );

    controller
        .with_config(RuntimeConfig::default().concurrency(concurrency))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!("Reconciled {}", object),
                Err(e) => error!("ManagedCluster controller error: {}", e),
            }
        })
        .await;

    Err(ControllerError::Watch(
        "ManagedCluster controller stream ended".to_string(),
    ))
}
