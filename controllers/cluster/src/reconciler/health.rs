//! Health aggregation
//!
//! Component health is derived from the ready replica counts of the
//! control-plane workloads in the cluster namespace. Cloud provider
//! infrastructure has no workload; it follows the
//! `CloudProviderInfrastructureReady` condition instead.

use crds::{
    ExposeStrategy, ExtendedHealth, HealthComponent, HealthStatus, ManagedCluster,
    ManagedClusterStatus, condition_types,
};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use store_client::Store;
use tracing::info;

use super::status::update_cluster;
use crate::error::ControllerError;
use crate::resources::{
    APISERVER_DEPLOYMENT, CONTROLLER_MANAGER_DEPLOYMENT, ETCD_STATEFULSET,
    MACHINE_CONTROLLER_DEPLOYMENT, OPENVPN_DEPLOYMENT, SCHEDULER_DEPLOYMENT,
    USERCLUSTER_CONTROLLER_DEPLOYMENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

/// A workload backing one health component
#[derive(Debug, Clone, Copy)]
pub struct TrackedWorkload {
    pub component: HealthComponent,
    pub kind: WorkloadKind,
    pub name: &'static str,
    pub min_ready: i32,
}

pub const TRACKED_WORKLOADS: [TrackedWorkload; 7] = [
    TrackedWorkload {
        component: HealthComponent::Apiserver,
        kind: WorkloadKind::Deployment,
        name: APISERVER_DEPLOYMENT,
        min_ready: 1,
    },
    TrackedWorkload {
        component: HealthComponent::Controller,
        kind: WorkloadKind::Deployment,
        name: CONTROLLER_MANAGER_DEPLOYMENT,
        min_ready: 1,
    },
    TrackedWorkload {
        component: HealthComponent::Scheduler,
        kind: WorkloadKind::Deployment,
        name: SCHEDULER_DEPLOYMENT,
        min_ready: 1,
    },
    TrackedWorkload {
        component: HealthComponent::Etcd,
        kind: WorkloadKind::StatefulSet,
        name: ETCD_STATEFULSET,
        min_ready: 2,
    },
    TrackedWorkload {
        component: HealthComponent::MachineController,
        kind: WorkloadKind::Deployment,
        name: MACHINE_CONTROLLER_DEPLOYMENT,
        min_ready: 1,
    },
    TrackedWorkload {
        component: HealthComponent::OpenVpn,
        kind: WorkloadKind::Deployment,
        name: OPENVPN_DEPLOYMENT,
        min_ready: 1,
    },
    TrackedWorkload {
        component: HealthComponent::UserClusterControllerManager,
        kind: WorkloadKind::Deployment,
        name: USERCLUSTER_CONTROLLER_DEPLOYMENT,
        min_ready: 1,
    },
];

/// Down when absent, Up at `min_ready` ready replicas, Provisioning otherwise
pub fn health_from_replicas(ready: Option<Option<i32>>, min_ready: i32) -> HealthStatus {
    match ready {
        None => HealthStatus::Down,
        Some(ready) if ready.unwrap_or(0) >= min_ready => HealthStatus::Up,
        Some(_) => HealthStatus::Provisioning,
    }
}

async fn ready_replicas(
    store: &Store,
    namespace: &str,
    workload: &TrackedWorkload,
) -> Result<Option<Option<i32>>, ControllerError> {
    let ready = match workload.kind {
        WorkloadKind::Deployment => store
            .get::<Deployment>(Some(namespace), workload.name)
            .await?
            .map(|d| d.status.and_then(|s| s.ready_replicas)),
        WorkloadKind::StatefulSet => store
            .get::<StatefulSet>(Some(namespace), workload.name)
            .await?
            .map(|s| s.status.and_then(|s| s.ready_replicas)),
    };
    Ok(ready)
}

/// Computes the health of every component. Read errors other than
/// not-found fail the whole computation.
pub async fn compute_health(
    store: &Store,
    status: &ManagedClusterStatus,
) -> Result<ExtendedHealth, ControllerError> {
    let mut health = ExtendedHealth::default();
    let namespace = status.namespace_name.as_str();
    if namespace.is_empty() {
        return Ok(health);
    }

    for workload in &TRACKED_WORKLOADS {
        let ready = ready_replicas(store, namespace, workload).await?;
        health.set(workload.component, health_from_replicas(ready, workload.min_ready));
    }

    let infrastructure =
        if status.is_condition_true(condition_types::CLOUD_PROVIDER_INFRASTRUCTURE_READY) {
            HealthStatus::Up
        } else {
            HealthStatus::Provisioning
        };
    health.set(HealthComponent::CloudProviderInfrastructure, infrastructure);
    Ok(health)
}

/// Whether `health` satisfies the cluster-initialized milestone.
/// Tunneled clusters run no tunnel server, so OpenVPN is not required.
pub fn is_healthy(health: &ExtendedHealth, strategy: ExposeStrategy) -> bool {
    HealthComponent::ALL.iter().all(|component| {
        (*component == HealthComponent::OpenVpn && strategy == ExposeStrategy::Tunneling)
            || health.get(*component) == HealthStatus::Up
    })
}

/// Recomputes and persists health, setting the one-way milestone
/// conditions. Writes only when something changed.
pub async fn sync_health(store: &Store, cluster: &mut ManagedCluster) -> Result<(), ControllerError> {
    let status = cluster.status_or_default();
    let health = compute_health(store, &status).await?;
    let healthy = is_healthy(&health, cluster.spec.expose_strategy);
    let name = cluster.metadata.name.clone().unwrap_or_default();

    let written = update_cluster(store, cluster, |c| {
        let status = c.status.get_or_insert_with(Default::default);
        status.extended_health = health.clone();

        if health.etcd == HealthStatus::Up
            && !status.is_condition_true(condition_types::ETCD_CLUSTER_INITIALIZED)
        {
            status.set_condition(
                condition_types::ETCD_CLUSTER_INITIALIZED,
                true,
                "",
                "Etcd cluster has been initialized successfully",
            );
        }
        if healthy && !status.is_condition_true(condition_types::CLUSTER_INITIALIZED) {
            status.set_condition(
                condition_types::CLUSTER_INITIALIZED,
                true,
                "",
                "Cluster has been initialized successfully",
            );
        }
        // a healthy cluster gives its update slot back
        if healthy && status.is_condition_true(condition_types::UPDATE_IN_PROGRESS) {
            status.set_condition(condition_types::UPDATE_IN_PROGRESS, false, "Converged", "");
        }
    })
    .await?;

    if written {
        info!("Updated health of cluster {}", name);
    }
    Ok(())
}
