//! Desired-state catalog
//!
//! The pipeline asks a [`ResourceCatalog`] for the named creators of every
//! stage. Stages a catalog does not fill in default to an empty list, so a
//! partial catalog is a structural fact rather than a runtime failure.
//!
//! [`StandardCatalog`] describes a minimal hosted control plane: etcd, the
//! Kubernetes control-plane components, the tunnel server and the
//! supporting objects they need.

mod deployments;
mod etcd;
mod misc;
mod policy;
mod rbac;
mod services;

pub use rbac::auth_delegator_binding_name;

use std::sync::Arc;

use crds::{BackupConfig, VerticalPodAutoscaler};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, Role, RoleBinding};
use reconciling::{BuildError, NamedObjectCreator};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use store_client::merge::apply_merge_patch;

use crate::reconciler::ClusterContext;

/// Service fronting the API server; its first port drives the address
pub const APISERVER_SERVICE: &str = "apiserver-external";
/// LoadBalancer Service whose ingress status carries the external IP
pub const FRONT_LB_SERVICE: &str = "front-loadbalancer";
pub const ETCD_SERVICE: &str = "etcd";
pub const ADMIN_KUBECONFIG_SECRET: &str = "admin-kubeconfig";
pub const CLOUD_CONFIG: &str = "cloud-config";

pub const APISERVER_DEPLOYMENT: &str = "apiserver";
pub const CONTROLLER_MANAGER_DEPLOYMENT: &str = "controller-manager";
pub const SCHEDULER_DEPLOYMENT: &str = "scheduler";
pub const MACHINE_CONTROLLER_DEPLOYMENT: &str = "machine-controller";
pub const USERCLUSTER_CONTROLLER_DEPLOYMENT: &str = "usercluster-controller";
pub const OPENVPN_DEPLOYMENT: &str = "openvpn-server";
pub const ETCD_STATEFULSET: &str = "etcd";
pub const POLICY_CONTROLLER: &str = "policy-controller";

/// Desired objects per pipeline stage. Every list is empty unless a
/// catalog overrides it.
#[allow(unused_variables, reason = "default stages ignore the context")]
pub trait ResourceCatalog: Send + Sync {
    fn services(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Service>> {
        Vec::new()
    }

    fn secrets(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Secret>> {
        Vec::new()
    }

    fn service_accounts(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<ServiceAccount>> {
        Vec::new()
    }

    fn roles(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Role>> {
        Vec::new()
    }

    fn role_bindings(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<RoleBinding>> {
        Vec::new()
    }

    /// Not owner-referenced; names must embed the cluster namespace
    fn cluster_role_bindings(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<ClusterRoleBinding>> {
        Vec::new()
    }

    fn stateful_sets(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<StatefulSet>> {
        Vec::new()
    }

    fn config_maps(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<ConfigMap>> {
        Vec::new()
    }

    fn deployments(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Deployment>> {
        Vec::new()
    }

    fn cron_jobs(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<CronJob>> {
        Vec::new()
    }

    fn pod_disruption_budgets(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<PodDisruptionBudget>> {
        Vec::new()
    }

    fn vertical_pod_autoscalers(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<VerticalPodAutoscaler>> {
        Vec::new()
    }

    fn backup_configs(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<BackupConfig>> {
        Vec::new()
    }

    /// Auxiliary policy engine; removed by name when disabled
    fn policy_engine_deployments(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<Deployment>> {
        Vec::new()
    }

    fn policy_engine_service_accounts(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<ServiceAccount>> {
        Vec::new()
    }
}

/// Default control-plane catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCatalog;

impl ResourceCatalog for StandardCatalog {
    fn services(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Service>> {
        services::services(ctx)
    }

    fn secrets(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Secret>> {
        vec![misc::admin_kubeconfig(ctx)]
    }

    fn service_accounts(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<ServiceAccount>> {
        rbac::service_accounts(ctx)
    }

    fn roles(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Role>> {
        rbac::roles(ctx)
    }

    fn role_bindings(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<RoleBinding>> {
        rbac::role_bindings(ctx)
    }

    fn cluster_role_bindings(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<ClusterRoleBinding>> {
        vec![rbac::auth_delegator_binding(ctx)]
    }

    fn stateful_sets(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<StatefulSet>> {
        vec![etcd::stateful_set(ctx)]
    }

    fn config_maps(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<ConfigMap>> {
        vec![misc::cloud_config(ctx)]
    }

    fn deployments(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Deployment>> {
        deployments::deployments(ctx)
    }

    fn cron_jobs(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<CronJob>> {
        vec![etcd::defragger(ctx)]
    }

    fn pod_disruption_budgets(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<PodDisruptionBudget>> {
        vec![
            etcd::disruption_budget(ctx),
            deployments::apiserver_disruption_budget(ctx),
        ]
    }

    fn vertical_pod_autoscalers(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<VerticalPodAutoscaler>> {
        misc::vertical_pod_autoscalers(ctx)
    }

    fn backup_configs(&self, ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<BackupConfig>> {
        vec![misc::default_backup(ctx)]
    }

    fn policy_engine_deployments(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<Deployment>> {
        vec![policy::deployment(ctx)]
    }

    fn policy_engine_service_accounts(
        &self,
        ctx: &Arc<ClusterContext>,
    ) -> Vec<NamedObjectCreator<ServiceAccount>> {
        vec![policy::service_account(ctx)]
    }
}

/// Overlays `desired`, a JSON merge patch, onto `current`. Fields the patch
/// does not name (server-side defaults among them) are kept.
pub(crate) fn overlay<T>(current: Option<T>, desired: &Value) -> Result<T, BuildError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut value = serde_json::to_value(current.unwrap_or_default())
        .map_err(|e| BuildError::new(format!("failed to encode current spec: {e}")))?;
    apply_merge_patch(&mut value, desired);
    serde_json::from_value(value)
        .map_err(|e| BuildError::new(format!("invalid desired spec: {e}")))
}

/// Names a getter list resolves to
pub fn names<K>(getters: &[NamedObjectCreator<K>]) -> Vec<String> {
    getters.iter().map(|getter| getter().0).collect()
}
