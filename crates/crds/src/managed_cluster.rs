//! ManagedCluster CRD
//!
//! The root entity: one tenant-facing Kubernetes control plane hosted in the
//! seed cluster. Cluster-scoped; every object the controller creates for it
//! lives in the namespace recorded in `status.namespaceName`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by all clusterkit resources.
pub const GROUP: &str = "clusterkit.io";

/// Finalizer tokens owned by the cluster controller.
pub mod finalizers {
    /// Deletes Node objects inside the managed cluster.
    pub const NODE_DELETION: &str = "clusterkit.io/delete-nodes";
    /// Deletes BackupConfig objects in the cluster namespace.
    pub const BACKUP_CLEANUP: &str = "clusterkit.io/cleanup-backups";
    /// Deletes the referenced provider credential Secret.
    pub const CREDENTIALS_CLEANUP: &str = "clusterkit.io/cleanup-credentials";
    /// Tears down provider-side infrastructure.
    pub const CLOUD_INFRASTRUCTURE_CLEANUP: &str =
        "clusterkit.io/cleanup-cloud-provider-infrastructure";
    /// Deletes the cluster namespace and the cluster-scoped objects the
    /// store does not cascade on its own.
    pub const NAMESPACE_CLEANUP: &str = "clusterkit.io/cleanup-namespace";

    /// All tokens in the order the deletion controller works through them.
    pub const CLEANUP_ORDER: [&str; 5] = [
        NODE_DELETION,
        BACKUP_CLEANUP,
        CREDENTIALS_CLEANUP,
        CLOUD_INFRASTRUCTURE_CLEANUP,
        NAMESPACE_CLEANUP,
    ];
}

/// Desired state of a managed cluster's control plane
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "clusterkit.io",
    version = "v1alpha1",
    kind = "ManagedCluster",
    shortname = "mc",
    status = "ManagedClusterStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".status.namespaceName"}"#,
    printcolumn = r#"{"name":"Apiserver","type":"string","jsonPath":".status.extendedHealth.apiserver"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Display name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_readable_name: Option<String>,

    /// Control-plane version, used for image tags
    #[serde(default)]
    pub version: String,

    /// Cloud placement
    #[serde(default)]
    pub cloud: CloudSpec,

    /// Network configuration; unset fields are defaulted by the controller
    #[serde(default)]
    pub cluster_network: ClusterNetwork,

    /// How the API server is exposed outside the seed
    #[serde(default)]
    pub expose_strategy: ExposeStrategy,

    /// Optional policy-engine integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_engine: Option<PolicyEngineSettings>,

    /// Provider credentials living outside the cluster namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_reference: Option<SecretReference>,

    /// Paused clusters are ignored by the controller
    #[serde(default)]
    pub pause: bool,

    /// Free-form feature flags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, bool>,
}

/// Where the cluster's machines run
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSpec {
    /// Datacenter name; part of the synthesized DNS name
    #[serde(default)]
    pub datacenter: String,

    /// Registered cloud provider name (e.g. "bringyourown")
    #[serde(default)]
    pub provider: String,
}

/// Network layout of the managed cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Service CIDRs, defaulted to 10.240.16.0/20
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services_cidr_blocks: Vec<String>,

    /// Pod CIDRs, defaulted to 172.25.0.0/16
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods_cidr_blocks: Vec<String>,

    /// Cluster DNS domain, defaulted to cluster.local
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns_domain: String,

    /// kube-proxy mode ("ipvs" or "iptables")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_mode: String,
}

/// API server exposure strategy
///
/// Serializes as PascalCase but also accepts lowercase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ExposeStrategy {
    /// Synthesized DNS name resolved to a seed node
    #[default]
    #[serde(alias = "nodeport")]
    NodePort,

    /// IP taken from an externally provisioned load balancer
    #[serde(alias = "loadbalancer")]
    LoadBalancer,

    /// Fixed tunneling agent address, no DNS lookup
    #[serde(alias = "tunneling")]
    Tunneling,
}

/// Policy-engine integration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEngineSettings {
    /// Deploys the policy-engine webhook into the cluster namespace
    #[serde(default)]
    pub enabled: bool,
}

/// Reference to a Secret in another namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,

    /// Defaults to the controller's credentials namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state, written only by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Namespace holding the control-plane objects; set once
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace_name: String,

    /// API server endpoint
    #[serde(default)]
    pub address: ClusterAddress,

    /// Per-component health
    #[serde(default)]
    pub extended_health: ExtendedHealth,

    /// Machine-readable reason of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Message of the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Latest observations, one per condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
}

/// Externally reachable endpoint of the managed API server
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddress {
    /// DNS name clients use from outside the seed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_name: String,

    /// In-seed service DNS name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_name: String,

    /// Address the external name resolves to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    /// Externally reachable API server port
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: i32,

    /// `https://{external_name}:{port}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

fn is_zero(port: &i32) -> bool {
    *port == 0
}

/// Component health
///
/// Serializes as PascalCase ("Up", "Down", ...) and accepts lowercase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum HealthStatus {
    /// Not running or not ready
    #[default]
    #[serde(alias = "down")]
    Down,
    /// Being set up
    #[serde(alias = "provisioning")]
    Provisioning,
    /// Ready
    #[serde(alias = "up")]
    Up,
}

/// Named health components of a managed cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum HealthComponent {
    Apiserver,
    Controller,
    Scheduler,
    Etcd,
    MachineController,
    OpenVpn,
    UserClusterControllerManager,
    CloudProviderInfrastructure,
}

impl HealthComponent {
    /// Every component, in status field order.
    pub const ALL: [HealthComponent; 8] = [
        HealthComponent::Apiserver,
        HealthComponent::Controller,
        HealthComponent::Scheduler,
        HealthComponent::Etcd,
        HealthComponent::MachineController,
        HealthComponent::OpenVpn,
        HealthComponent::UserClusterControllerManager,
        HealthComponent::CloudProviderInfrastructure,
    ];
}

/// Health of every control-plane component
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ExtendedHealth {
    #[serde(default)]
    pub apiserver: HealthStatus,
    #[serde(default)]
    pub controller: HealthStatus,
    #[serde(default)]
    pub scheduler: HealthStatus,
    #[serde(default)]
    pub etcd: HealthStatus,
    #[serde(default)]
    pub machine_controller: HealthStatus,
    #[serde(default)]
    pub openvpn: HealthStatus,
    #[serde(default)]
    pub user_cluster_controller_manager: HealthStatus,
    #[serde(default)]
    pub cloud_provider_infrastructure: HealthStatus,
}

impl ExtendedHealth {
    /// Health of one component
    pub fn get(&self, component: HealthComponent) -> HealthStatus {
        match component {
            HealthComponent::Apiserver => self.apiserver,
            HealthComponent::Controller => self.controller,
            HealthComponent::Scheduler => self.scheduler,
            HealthComponent::Etcd => self.etcd,
            HealthComponent::MachineController => self.machine_controller,
            HealthComponent::OpenVpn => self.openvpn,
            HealthComponent::UserClusterControllerManager => self.user_cluster_controller_manager,
            HealthComponent::CloudProviderInfrastructure => self.cloud_provider_infrastructure,
        }
    }

    /// Records the health of one component
    pub fn set(&mut self, component: HealthComponent, status: HealthStatus) {
        let slot = match component {
            HealthComponent::Apiserver => &mut self.apiserver,
            HealthComponent::Controller => &mut self.controller,
            HealthComponent::Scheduler => &mut self.scheduler,
            HealthComponent::Etcd => &mut self.etcd,
            HealthComponent::MachineController => &mut self.machine_controller,
            HealthComponent::OpenVpn => &mut self.openvpn,
            HealthComponent::UserClusterControllerManager => {
                &mut self.user_cluster_controller_manager
            }
            HealthComponent::CloudProviderInfrastructure => &mut self.cloud_provider_infrastructure,
        };
        *slot = status;
    }

    /// True when every component is Up.
    pub fn all_healthy(&self) -> bool {
        HealthComponent::ALL
            .iter()
            .all(|c| self.get(*c) == HealthStatus::Up)
    }
}

/// Well-known condition types
pub mod condition_types {
    /// Set once every component reported healthy
    pub const CLUSTER_INITIALIZED: &str = "ClusterInitialized";
    /// Set once etcd reported healthy
    pub const ETCD_CLUSTER_INITIALIZED: &str = "EtcdClusterInitialized";
    /// Cloud provider finished setting up infrastructure
    pub const CLOUD_PROVIDER_INFRASTRUCTURE_READY: &str = "CloudProviderInfrastructureReady";
    /// Whether the last pass finished without error
    pub const RECONCILING_SUCCESS: &str = "ReconcilingSuccess";
    /// Marks a cluster holding one of the fleet-wide update slots
    pub const UPDATE_IN_PROGRESS: &str = "UpdateInProgress";
}

/// One entry of `status.conditions`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// One of [`condition_types`]
    #[serde(rename = "type")]
    pub type_: String,

    /// True or False
    pub status: ConditionStatus,

    /// CamelCase reason of the last change
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the status last flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

impl ManagedClusterStatus {
    /// Condition of the given type, if set
    pub fn condition(&self, type_: &str) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition is set and True
    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Upserts a condition. The transition time only moves when the status
    /// flips, so re-applying the same condition leaves the status untouched.
    pub fn set_condition(&mut self, type_: &str, status: bool, reason: &str, message: &str) {
        let status = ConditionStatus::from(status);
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(chrono::Utc::now());
            }
            reason.clone_into(&mut existing.reason);
            message.clone_into(&mut existing.message);
            return;
        }
        self.conditions.push(ClusterCondition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(chrono::Utc::now()),
        });
    }
}

impl ManagedCluster {
    /// Status, or an empty one when the object has never been reconciled.
    pub fn status_or_default(&self) -> ManagedClusterStatus {
        self.status.clone().unwrap_or_default()
    }

    /// A deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether `token` is among the finalizers
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|t| t == token))
    }

    /// Set-insert; returns true when the token was not present before.
    pub fn add_finalizer(&mut self, token: &str) -> bool {
        if self.has_finalizer(token) {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(token.to_string());
        true
    }

    /// Returns true when the token was present.
    pub fn remove_finalizer(&mut self, token: &str) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|t| t != token);
        before != finalizers.len()
    }
}
