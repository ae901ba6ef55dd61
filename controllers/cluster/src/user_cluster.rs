//! Access to the API server of a managed cluster.

use std::time::Duration;

use async_trait::async_trait;
use crds::ManagedCluster;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use store_client::{KubeObjectStore, Store};
use tracing::debug;

use crate::error::ControllerError;
use crate::resources::ADMIN_KUBECONFIG_SECRET;

/// Key of the kubeconfig inside the admin Secret
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Builds a store talking to the managed cluster itself
#[async_trait]
pub trait UserClusterConnector: Send + Sync {
    async fn connect(&self, cluster: &ManagedCluster) -> Result<Store, ControllerError>;
}

/// Connects with the admin kubeconfig stored in the cluster namespace
#[derive(Debug, Clone)]
pub struct KubeconfigConnector {
    seed: Store,
    timeout: Duration,
}

impl KubeconfigConnector {
    pub fn new(seed: Store, timeout: Duration) -> Self {
        Self { seed, timeout }
    }
}

#[async_trait]
impl UserClusterConnector for KubeconfigConnector {
    async fn connect(&self, cluster: &ManagedCluster) -> Result<Store, ControllerError> {
        let namespace = cluster.status_or_default().namespace_name;
        if namespace.is_empty() {
            return Err(ControllerError::UserCluster(
                "cluster namespace is not set yet".to_string(),
            ));
        }

        let secret: Secret = self
            .seed
            .get(Some(&namespace), ADMIN_KUBECONFIG_SECRET)
            .await?
            .ok_or_else(|| {
                ControllerError::UserCluster(format!(
                    "secret {namespace}/{ADMIN_KUBECONFIG_SECRET} not found"
                ))
            })?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| {
                ControllerError::UserCluster(format!(
                    "secret {namespace}/{ADMIN_KUBECONFIG_SECRET} has no {KUBECONFIG_KEY} key"
                ))
            })?;
        let raw = String::from_utf8(raw.0.clone())
            .map_err(|e| ControllerError::UserCluster(format!("kubeconfig is not UTF-8: {e}")))?;

        let kubeconfig = Kubeconfig::from_yaml(&raw)
            .map_err(|e| ControllerError::UserCluster(format!("invalid kubeconfig: {e}")))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ControllerError::UserCluster(format!("invalid kubeconfig: {e}")))?;
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);

        let client = Client::try_from(config)?;
        Ok(Store::new(KubeObjectStore::new(client)))
    }
}

/// Live check of the managed API server. Any failure counts as not reachable.
pub async fn is_reachable(connector: &dyn UserClusterConnector, cluster: &ManagedCluster) -> bool {
    let name = cluster.metadata.name.as_deref().unwrap_or("<unknown>");
    let store = match connector.connect(cluster).await {
        Ok(store) => store,
        Err(e) => {
            debug!("Cluster {} is not reachable: {}", name, e);
            return false;
        }
    };
    match store.list::<Namespace>(None).await {
        Ok(_) => true,
        Err(e) => {
            debug!("Cluster {} is not reachable: {}", name, e);
            false
        }
    }
}
