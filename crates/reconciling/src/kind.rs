//! Kinds the engine can manage.

use crds::{BackupConfig, BackupConfigSpec, VerticalPodAutoscaler, VerticalPodAutoscalerSpec};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use store_client::StoreObject;

/// A store object with a zero value, handed to creators when the object
/// does not exist yet.
pub trait ManagedKind: StoreObject {
    /// The object a creator starts from when nothing is stored yet
    fn blank() -> Self;
}

macro_rules! managed_kinds {
    ($($kind:ty => $blank:expr),* $(,)?) => {
        $(
            impl ManagedKind for $kind {
                fn blank() -> Self {
                    $blank
                }
            }
        )*
    };
}

managed_kinds! {
    Service => Service::default(),
    Secret => Secret::default(),
    ConfigMap => ConfigMap::default(),
    ServiceAccount => ServiceAccount::default(),
    Role => Role::default(),
    RoleBinding => RoleBinding::default(),
    ClusterRole => ClusterRole::default(),
    ClusterRoleBinding => ClusterRoleBinding::default(),
    StatefulSet => StatefulSet::default(),
    Deployment => Deployment::default(),
    CronJob => CronJob::default(),
    PodDisruptionBudget => PodDisruptionBudget::default(),
    VerticalPodAutoscaler => VerticalPodAutoscaler::new("", VerticalPodAutoscalerSpec::default()),
    BackupConfig => BackupConfig::new("", BackupConfigSpec::default()),
}
