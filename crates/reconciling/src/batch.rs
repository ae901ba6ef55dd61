//! Batch reconcilers.
//!
//! Each one maps a list of named creators onto the ensure engine for one
//! namespace (or cluster scope), wrapping every creator with the supplied
//! modifiers. The first error stops the batch.

use crds::{BackupConfig, VerticalPodAutoscaler};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use store_client::Store;
use tracing::debug;

use crate::creator::{NamedObjectCreator, ObjectModifier, apply_modifiers};
use crate::ensure::{EnsureOutcome, ensure_named_object};
use crate::error::ReconcileError;
use crate::kind::ManagedKind;

/// Per-batch write accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Objects that did not exist before
    pub created: usize,
    /// Objects rewritten because they drifted
    pub updated: usize,
    /// Objects already in their desired state
    pub unchanged: usize,
}

impl BatchSummary {
    /// Number of writes the batch issued
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }

    fn record(&mut self, outcome: EnsureOutcome) {
        match outcome {
            EnsureOutcome::Created => self.created += 1,
            EnsureOutcome::Updated => self.updated += 1,
            EnsureOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Generic batch reconciler, fail-fast.
pub async fn reconcile_objects<K: ManagedKind>(
    store: &Store,
    getters: &[NamedObjectCreator<K>],
    namespace: Option<&str>,
    modifiers: &[ObjectModifier<K>],
) -> Result<BatchSummary, ReconcileError> {
    let mut summary = BatchSummary::default();
    for getter in getters {
        let (name, create) = getter();
        let create = apply_modifiers(create, modifiers);
        summary.record(ensure_named_object(store, namespace, &name, &create).await?);
    }
    debug!(
        "Reconciled {} {} objects ({} created, {} updated)",
        getters.len(),
        K::kind(&()),
        summary.created,
        summary.updated
    );
    Ok(summary)
}

/// Deletes the named objects, treating absent ones as already deleted.
/// Returns how many objects were actually removed.
pub async fn delete_objects_if_present<K: ManagedKind>(
    store: &Store,
    namespace: Option<&str>,
    names: &[String],
) -> Result<usize, ReconcileError> {
    let mut deleted = 0;
    for name in names {
        let removed = store
            .delete_if_present::<K>(namespace, name)
            .await
            .map_err(|source| ReconcileError::Write {
                kind: K::kind(&()).to_string(),
                name: name.clone(),
                source,
            })?;
        if removed {
            deleted += 1;
        }
    }
    Ok(deleted)
}

macro_rules! namespaced_reconciler {
    ($($(#[$doc:meta])* $name:ident => $kind:ty;)*) => {
        $(
            $(#[$doc])*
            pub async fn $name(
                store: &Store,
                getters: &[NamedObjectCreator<$kind>],
                namespace: &str,
                modifiers: &[ObjectModifier<$kind>],
            ) -> Result<BatchSummary, ReconcileError> {
                reconcile_objects(store, getters, Some(namespace), modifiers).await
            }
        )*
    };
}

macro_rules! cluster_scoped_reconciler {
    ($($(#[$doc:meta])* $name:ident => $kind:ty;)*) => {
        $(
            $(#[$doc])*
            pub async fn $name(
                store: &Store,
                getters: &[NamedObjectCreator<$kind>],
                modifiers: &[ObjectModifier<$kind>],
            ) -> Result<BatchSummary, ReconcileError> {
                reconcile_objects(store, getters, None, modifiers).await
            }
        )*
    };
}

namespaced_reconciler! {
    /// Ensures Services in `namespace`.
    reconcile_services => Service;
    /// Ensures Secrets in `namespace`.
    reconcile_secrets => Secret;
    /// Ensures ConfigMaps in `namespace`.
    reconcile_config_maps => ConfigMap;
    /// Ensures ServiceAccounts in `namespace`.
    reconcile_service_accounts => ServiceAccount;
    /// Ensures Roles in `namespace`.
    reconcile_roles => Role;
    /// Ensures RoleBindings in `namespace`.
    reconcile_role_bindings => RoleBinding;
    /// Ensures StatefulSets in `namespace`.
    reconcile_stateful_sets => StatefulSet;
    /// Ensures Deployments in `namespace`.
    reconcile_deployments => Deployment;
    /// Ensures CronJobs in `namespace`.
    reconcile_cron_jobs => CronJob;
    /// Ensures PodDisruptionBudgets in `namespace`.
    reconcile_pod_disruption_budgets => PodDisruptionBudget;
    /// Ensures VerticalPodAutoscalers in `namespace`.
    reconcile_vertical_pod_autoscalers => VerticalPodAutoscaler;
    /// Ensures BackupConfigs in `namespace`.
    reconcile_backup_configs => BackupConfig;
}

cluster_scoped_reconciler! {
    /// Ensures ClusterRoles. Ownership is encoded in the names.
    reconcile_cluster_roles => ClusterRole;
    /// Ensures ClusterRoleBindings. Ownership is encoded in the names.
    reconcile_cluster_role_bindings => ClusterRoleBinding;
}
