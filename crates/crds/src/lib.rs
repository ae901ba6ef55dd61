//! clusterkit CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the clusterkit controllers.

pub mod managed_cluster;
pub mod backup_config;
pub mod vertical_pod_autoscaler;

pub use managed_cluster::*;
pub use backup_config::*;
pub use vertical_pod_autoscaler::*;
