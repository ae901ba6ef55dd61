//! Per-pass cluster context handed to resource builders.

use std::collections::BTreeMap;

use crds::{ClusterAddress, ClusterNetwork, ExposeStrategy, ManagedCluster};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::config::ControllerConfig;
use crate::error::ControllerError;

/// Everything the builders may know about a cluster, captured once per pass.
/// Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterContext {
    pub cluster_name: String,
    pub namespace: String,
    pub version: String,
    pub expose_strategy: ExposeStrategy,
    pub network: ClusterNetwork,
    pub address: ClusterAddress,
    pub datacenter: String,
    pub provider: String,
    pub policy_engine_enabled: bool,
    /// Replaces the registry part of every image
    pub registry: Option<String>,
    pub etcd_replicas: i32,
    pub enable_vpa: bool,
    pub enable_backups: bool,
    /// Controller reference to the ManagedCluster
    pub owner: OwnerReference,
}

impl ClusterContext {
    pub fn new(cluster: &ManagedCluster, config: &ControllerConfig) -> Result<Self, ControllerError> {
        let cluster_name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidObject("cluster has no name".to_string()))?;
        let status = cluster.status_or_default();
        if status.namespace_name.is_empty() {
            return Err(ControllerError::InvalidObject(format!(
                "cluster {cluster_name} has no namespace yet"
            )));
        }
        let owner = cluster.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidObject(format!("cluster {cluster_name} has no uid"))
        })?;

        Ok(Self {
            cluster_name,
            namespace: status.namespace_name,
            version: cluster.spec.version.clone(),
            expose_strategy: cluster.spec.expose_strategy,
            network: cluster.spec.cluster_network.clone(),
            address: status.address,
            datacenter: cluster.spec.cloud.datacenter.clone(),
            provider: cluster.spec.cloud.provider.clone(),
            policy_engine_enabled: cluster
                .spec
                .policy_engine
                .as_ref()
                .is_some_and(|p| p.enabled),
            registry: config.overwrite_registry.clone(),
            etcd_replicas: config.etcd_replicas,
            enable_vpa: config.enable_vpa,
            enable_backups: config.enable_etcd_backups,
            owner,
        })
    }

    /// `repository:tag`, with the registry swapped when an override is set.
    pub fn image(&self, repository: &str, tag: &str) -> String {
        let repository = match (&self.registry, repository.split_once('/')) {
            (Some(registry), Some((_, path))) => format!("{registry}/{path}"),
            (Some(registry), None) => format!("{registry}/{repository}"),
            (None, _) => repository.to_string(),
        };
        format!("{repository}:{tag}")
    }

    /// Image tag of the Kubernetes control-plane components
    pub fn kubernetes_tag(&self) -> String {
        if self.version.starts_with('v') {
            self.version.clone()
        } else {
            format!("v{}", self.version)
        }
    }

    pub fn labels(&self, app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), app.to_string()),
            ("cluster".to_string(), self.cluster_name.clone()),
        ])
    }
}
