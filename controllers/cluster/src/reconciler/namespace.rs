//! Cluster namespace and network defaults.

use std::collections::BTreeMap;

use crds::{ManagedCluster, finalizers};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use store_client::Store;
use tracing::info;

use super::status::update_cluster;
use crate::error::ControllerError;

pub const DEFAULT_SERVICES_CIDR: &str = "10.240.16.0/20";
pub const DEFAULT_PODS_CIDR: &str = "172.25.0.0/16";
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
pub const DEFAULT_PROXY_MODE: &str = "ipvs";

/// Namespace a cluster's control plane lives in
pub fn namespace_name(cluster_name: &str) -> String {
    format!("cluster-{cluster_name}")
}

/// Ensures the cluster namespace exists and is recorded in
/// `status.namespaceName`. The cleanup finalizers are attached before
/// anything is created so nothing can leak.
pub async fn ensure_namespace(
    store: &Store,
    cluster: &mut ManagedCluster,
) -> Result<String, ControllerError> {
    let cluster_name = cluster
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidObject("cluster has no name".to_string()))?;

    let with_credentials = cluster.spec.credentials_reference.is_some();
    update_cluster(store, cluster, |c| {
        c.add_finalizer(finalizers::NAMESPACE_CLEANUP);
        if with_credentials {
            c.add_finalizer(finalizers::CREDENTIALS_CLEANUP);
        }
    })
    .await?;

    let recorded = cluster.status_or_default().namespace_name;
    let name = if recorded.is_empty() {
        namespace_name(&cluster_name)
    } else {
        recorded
    };

    if store.get::<Namespace>(None, &name).await?.is_none() {
        let owner = cluster.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidObject(format!("cluster {cluster_name} has no uid"))
        })?;
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(
                    "cluster".to_string(),
                    cluster_name.clone(),
                )])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            ..Default::default()
        };
        store.create(&namespace).await?;
        info!("Created namespace {} for cluster {}", name, cluster_name);
    }

    update_cluster(store, cluster, |c| {
        let status = c.status.get_or_insert_with(Default::default);
        if status.namespace_name.is_empty() {
            status.namespace_name.clone_from(&name);
        }
    })
    .await?;
    Ok(name)
}

/// Fills unset network fields with the defaults; set values are never
/// touched.
pub async fn ensure_network_defaults(
    store: &Store,
    cluster: &mut ManagedCluster,
) -> Result<bool, ControllerError> {
    update_cluster(store, cluster, |c| {
        let network = &mut c.spec.cluster_network;
        if network.services_cidr_blocks.is_empty() {
            network.services_cidr_blocks = vec![DEFAULT_SERVICES_CIDR.to_string()];
        }
        if network.pods_cidr_blocks.is_empty() {
            network.pods_cidr_blocks = vec![DEFAULT_PODS_CIDR.to_string()];
        }
        if network.dns_domain.is_empty() {
            network.dns_domain = DEFAULT_DNS_DOMAIN.to_string();
        }
        if network.proxy_mode.is_empty() {
            network.proxy_mode = DEFAULT_PROXY_MODE.to_string();
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{seed_cluster, test_cluster};
    use crds::SecretReference;
    use store_client::MockObjectStore;

    #[tokio::test]
    async fn test_namespace_created_once_with_finalizers() {
        let mock = MockObjectStore::new();
        let store = Store::new(mock.clone());
        let mut cluster = seed_cluster(&mock, test_cluster("abc"));

        let name = ensure_namespace(&store, &mut cluster).await.unwrap();
        assert_eq!(name, "cluster-abc");
        assert!(cluster.has_finalizer(finalizers::NAMESPACE_CLEANUP));
        assert!(!cluster.has_finalizer(finalizers::CREDENTIALS_CLEANUP));
        assert_eq!(cluster.status_or_default().namespace_name, "cluster-abc");

        let namespace: Namespace = mock.object(None, "cluster-abc").unwrap();
        let owner = &namespace.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "ManagedCluster");
        assert_eq!(owner.name, "abc");

        mock.reset_counters();
        ensure_namespace(&store, &mut cluster).await.unwrap();
        assert_eq!(mock.counters().total(), 0);
    }

    #[tokio::test]
    async fn test_missing_namespace_is_recreated() {
        let mock = MockObjectStore::new();
        let store = Store::new(mock.clone());
        let mut cluster = seed_cluster(&mock, test_cluster("abc"));
        ensure_namespace(&store, &mut cluster).await.unwrap();

        store.delete::<Namespace>(None, "cluster-abc").await.unwrap();
        ensure_namespace(&store, &mut cluster).await.unwrap();
        assert_eq!(mock.count::<Namespace>(None), 1);
    }

    #[tokio::test]
    async fn test_credentials_finalizer_only_with_reference() {
        let mock = MockObjectStore::new();
        let store = Store::new(mock.clone());
        let mut cluster = test_cluster("abc");
        cluster.spec.credentials_reference = Some(SecretReference {
            name: "credential-abc".to_string(),
            namespace: None,
        });
        let mut cluster = seed_cluster(&mock, cluster);

        ensure_namespace(&store, &mut cluster).await.unwrap();
        assert!(cluster.has_finalizer(finalizers::CREDENTIALS_CLEANUP));
    }

    #[tokio::test]
    async fn test_network_defaults_keep_set_values() {
        let mock = MockObjectStore::new();
        let store = Store::new(mock.clone());
        let mut cluster = test_cluster("abc");
        cluster.spec.cluster_network.proxy_mode = "iptables".to_string();
        let mut cluster = seed_cluster(&mock, cluster);

        assert!(ensure_network_defaults(&store, &mut cluster).await.unwrap());
        let network = &cluster.spec.cluster_network;
        assert_eq!(network.services_cidr_blocks, vec![DEFAULT_SERVICES_CIDR.to_string()]);
        assert_eq!(network.pods_cidr_blocks, vec![DEFAULT_PODS_CIDR.to_string()]);
        assert_eq!(network.dns_domain, DEFAULT_DNS_DOMAIN);
        assert_eq!(network.proxy_mode, "iptables");

        assert!(!ensure_network_defaults(&store, &mut cluster).await.unwrap());
    }
}
