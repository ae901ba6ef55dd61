//! Test utilities for unit testing reconcilers
//!
//! Builders for test objects plus in-memory stand-ins for the DNS
//! resolver, event recorder, user cluster connector and cloud provider.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use crds::{
    CloudSpec, ClusterAddress, ClusterNetwork, ExposeStrategy, ManagedCluster, ManagedClusterSpec,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use store_client::{MockObjectStore, Store};

use crate::cloud::{CloudProvider, CloudProviderRegistry, InfrastructureState};
use crate::config::ControllerConfig;
use crate::dns::Resolver;
use crate::error::ControllerError;
use crate::events::{EventRecorder, EventType};
use crate::reconciler::{Action, ClusterContext, Reconciler};
use crate::resources::APISERVER_DEPLOYMENT;
use crate::user_cluster::UserClusterConnector;

/// Helper to create a ManagedCluster with a uid, as read from the store
pub fn test_cluster(name: &str) -> ManagedCluster {
    let mut cluster = ManagedCluster::new(
        name,
        ManagedClusterSpec {
            version: "1.30.2".to_string(),
            cloud: CloudSpec {
                datacenter: "europe-west3-c".to_string(),
                provider: String::new(),
            },
            ..Default::default()
        },
    );
    cluster.metadata.uid = Some(format!("uid-{name}"));
    cluster
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        external_url: "dev.kubermatic.io".to_string(),
        ..Default::default()
    }
}

/// Context of cluster "abc" with a resolved NodePort-style address
pub fn test_context(strategy: ExposeStrategy) -> ClusterContext {
    let mut cluster = test_cluster("abc");
    cluster.spec.expose_strategy = strategy;
    cluster.spec.cluster_network = ClusterNetwork {
        services_cidr_blocks: vec!["10.240.16.0/20".to_string()],
        pods_cidr_blocks: vec!["172.25.0.0/16".to_string()],
        dns_domain: "cluster.local".to_string(),
        proxy_mode: "ipvs".to_string(),
    };
    let status = cluster.status.get_or_insert_with(Default::default);
    status.namespace_name = "cluster-abc".to_string();
    status.address = ClusterAddress {
        external_name: "abc.europe-west3-c.dev.kubermatic.io".to_string(),
        internal_name: "apiserver-external.cluster-abc.svc.cluster.local".to_string(),
        ip: "34.89.181.151".to_string(),
        port: 32000,
        url: "https://abc.europe-west3-c.dev.kubermatic.io:32000".to_string(),
    };
    ClusterContext::new(&cluster, &test_config()).unwrap()
}

/// Seeds `cluster` and returns it as stored (with resourceVersion)
pub fn seed_cluster(mock: &MockObjectStore, cluster: ManagedCluster) -> ManagedCluster {
    let name = cluster.metadata.name.clone().unwrap();
    mock.insert(&cluster);
    mock.object(None, &name).unwrap()
}

pub fn ready_deployment(namespace: &str, name: &str, ready: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ready_stateful_set(namespace: &str, name: &str, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(StatefulSetStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Resolver answering from a fixed table; unknown hosts fail
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addrs: &[&str]) -> Self {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.hosts.insert(host.to_string(), addrs);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ControllerError> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| ControllerError::Dns(format!("no such host {host}")))
    }
}

/// Keeps published events for assertions
#[derive(Debug, Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<(EventType, String, String)>>,
}

impl RecordingEventRecorder {
    pub fn events(&self) -> Vec<(EventType, String, String)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn publish(
        &self,
        _cluster: &ManagedCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_type, reason.to_string(), message.to_string()));
    }
}

/// Hands out a fixed user cluster store, or fails when none is set
#[derive(Debug, Default)]
pub struct StaticConnector {
    store: Mutex<Option<Store>>,
}

impl StaticConnector {
    pub fn reachable(store: Store) -> Self {
        Self {
            store: Mutex::new(Some(store)),
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set(&self, store: Option<Store>) {
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = store;
    }
}

#[async_trait]
impl UserClusterConnector for StaticConnector {
    async fn connect(&self, _cluster: &ManagedCluster) -> Result<Store, ControllerError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ControllerError::UserCluster("connection refused".to_string()))
    }
}

/// Provider with a switchable infrastructure state
#[derive(Debug)]
pub struct FakeCloudProvider {
    state: Mutex<InfrastructureState>,
    pub cleanups: AtomicUsize,
}

impl FakeCloudProvider {
    pub fn new(state: InfrastructureState) -> Self {
        Self {
            state: Mutex::new(state),
            cleanups: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: InfrastructureState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
    fn needs_cleanup(&self) -> bool {
        true
    }

    async fn initialize(
        &self,
        _cluster: &ManagedCluster,
    ) -> Result<InfrastructureState, ControllerError> {
        Ok(*self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn cleanup(&self, _cluster: &ManagedCluster) -> Result<(), ControllerError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Name of the provider backed by [`FakeCloudProvider`] in a [`Harness`]
pub const FAKE_PROVIDER: &str = "fake";
/// Synthesized DNS name of cluster "abc"
pub const ABC_HOST: &str = "abc.europe-west3-c.dev.kubermatic.io";

/// A reconciler over mock stores, with every collaborator observable
pub struct Harness {
    pub mock: MockObjectStore,
    pub user: MockObjectStore,
    pub connector: Arc<StaticConnector>,
    pub events: Arc<RecordingEventRecorder>,
    pub provider: Arc<FakeCloudProvider>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let mock = MockObjectStore::new();
        let user = MockObjectStore::new();
        let connector = Arc::new(StaticConnector::reachable(Store::new(user.clone())));
        let events = Arc::new(RecordingEventRecorder::default());
        let provider = Arc::new(FakeCloudProvider::new(InfrastructureState::Ready));
        let mut registry = CloudProviderRegistry::default();
        registry.register(FAKE_PROVIDER, provider.clone());
        let resolver = StaticResolver::new().with(ABC_HOST, &["34.89.181.151"]);

        let reconciler = Reconciler::new(Store::new(mock.clone()), events.clone(), config)
            .with_resolver(Arc::new(resolver))
            .with_connector(connector.clone())
            .with_cloud_providers(registry);
        Self {
            mock,
            user,
            connector,
            events,
            provider,
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn store(&self) -> Store {
        Store::new(self.mock.clone())
    }

    pub fn user_store(&self) -> Store {
        Store::new(self.user.clone())
    }

    pub fn cluster(&self, name: &str) -> ManagedCluster {
        self.mock.object(None, name).unwrap()
    }

    pub async fn reconcile(&self, name: &str) -> Action {
        self.reconciler.reconcile(name).await.unwrap()
    }

    /// Reports the API server of `namespace` as ready
    pub fn mark_apiserver_ready(&self, namespace: &str) {
        self.mock
            .insert(&ready_deployment(namespace, APISERVER_DEPLOYMENT, 1));
    }
}
