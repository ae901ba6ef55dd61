//! BackupConfig CRD
//!
//! Schedules etcd backups for one managed cluster. Lives in the cluster
//! namespace and is removed explicitly on cluster deletion.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Backup schedule of one cluster
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "clusterkit.io",
    version = "v1alpha1",
    kind = "BackupConfig",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfigSpec {
    /// Name of the ManagedCluster being backed up
    pub cluster: String,

    /// Cron schedule
    pub schedule: String,

    /// Number of backups to retain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<u32>,

    /// Backup destination name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}
