//! VerticalPodAutoscaler
//!
//! Minimal typed view of the upstream `autoscaling.k8s.io` resource, enough
//! for the controller to own VPAs for control-plane workloads.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Autoscaling target and policy
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "autoscaling.k8s.io",
    version = "v1",
    kind = "VerticalPodAutoscaler",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    /// Workload whose pods are resized
    pub target_ref: CrossVersionObjectReference,

    /// How recommendations are applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

    /// Passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<serde_json::Value>,
}

/// Reference to a workload in the VPA's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    /// e.g. `apps/v1`
    pub api_version: String,
    /// e.g. `Deployment`
    pub kind: String,
    /// Workload name
    pub name: String,
}

/// Update behavior of the autoscaler
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    /// "Off", "Initial", "Recreate" or "Auto"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,
}
