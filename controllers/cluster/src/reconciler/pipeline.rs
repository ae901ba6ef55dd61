//! One convergence pass
//!
//! Every pass recomputes all steps from the observed state; nothing records
//! which step ran last. Gates end the pass with a requeue instead of
//! waiting in place.

use std::sync::Arc;
use std::time::Duration;

use crds::{ExposeStrategy, HealthStatus, ManagedCluster, condition_types, finalizers};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use reconciling::{
    ManagedKind, ObjectModifier, delete_objects_if_present, owner_reference_modifier,
    reconcile_backup_configs, reconcile_cluster_role_bindings, reconcile_config_maps,
    reconcile_cron_jobs, reconcile_deployments, reconcile_pod_disruption_budgets,
    reconcile_role_bindings, reconcile_roles, reconcile_secrets, reconcile_service_accounts,
    reconcile_services, reconcile_stateful_sets, reconcile_vertical_pod_autoscalers,
};
use tracing::{debug, info};

use super::address::sync_address;
use super::health::sync_health;
use super::namespace::{ensure_namespace, ensure_network_defaults};
use super::{Action, ClusterContext, Reconciler, RequeueReason, update_cluster};
use crate::cloud::InfrastructureState;
use crate::error::ControllerError;
use crate::resources::names;
use crate::user_cluster::is_reachable;

pub const ADMISSION_REQUEUE: Duration = Duration::from_secs(10);
pub const ADDRESS_REQUEUE: Duration = Duration::from_secs(5);
pub const INFRASTRUCTURE_REQUEUE: Duration = Duration::from_secs(1);
pub const APISERVER_REQUEUE: Duration = Duration::from_secs(5);
pub const UNREACHABLE_REQUEUE: Duration = Duration::from_secs(10);

fn owned<K: ManagedKind>(ctx: &ClusterContext) -> [ObjectModifier<K>; 1] {
    [owner_reference_modifier(ctx.owner.clone())]
}

impl Reconciler {
    /// Runs the pipeline for `cluster`, which is kept at the stored state
    /// as steps write.
    pub(crate) async fn converge(
        &self,
        cluster: &mut ManagedCluster,
    ) -> Result<Action, ControllerError> {
        if cluster.is_deleting() {
            return self.reconcile_deletion(cluster).await;
        }
        let name = cluster.metadata.name.clone().unwrap_or_default();

        sync_health(&self.store, cluster).await?;

        if !self.admission.admit(&self.store, cluster).await? {
            return Ok(Action::requeue(ADMISSION_REQUEUE, RequeueReason::NotAdmitted));
        }

        ensure_namespace(&self.store, cluster).await?;
        self.ensure_infrastructure(cluster).await?;
        ensure_network_defaults(&self.store, cluster).await?;

        let ctx = Arc::new(ClusterContext::new(cluster, &self.config)?);
        let ns = ctx.namespace.as_str();
        reconcile_services(&self.store, &self.catalog.services(&ctx), ns, &owned(&ctx)).await?;

        let mutations =
            sync_address(cluster, &self.seed_settings(), &self.store, self.resolver.as_ref())
                .await?;
        if !mutations.is_empty() {
            update_cluster(&self.store, cluster, |c| {
                let address = &mut c.status.get_or_insert_with(Default::default).address;
                for mutation in &mutations {
                    mutation.apply(address);
                }
            })
            .await?;
            info!("Updated address of cluster {}", name);
        }
        let status = cluster.status_or_default();
        if status.address.ip.is_empty() && cluster.spec.expose_strategy != ExposeStrategy::Tunneling
        {
            debug!("Cluster {} has no address yet", name);
            return Ok(Action::requeue(ADDRESS_REQUEUE, RequeueReason::AddressPending));
        }

        // builders below need the address
        let ctx = Arc::new(ClusterContext::new(cluster, &self.config)?);
        let ns = ctx.namespace.as_str();
        reconcile_secrets(&self.store, &self.catalog.secrets(&ctx), ns, &owned(&ctx)).await?;
        reconcile_service_accounts(
            &self.store,
            &self.catalog.service_accounts(&ctx),
            ns,
            &owned(&ctx),
        )
        .await?;
        reconcile_roles(&self.store, &self.catalog.roles(&ctx), ns, &owned(&ctx)).await?;
        reconcile_role_bindings(&self.store, &self.catalog.role_bindings(&ctx), ns, &owned(&ctx))
            .await?;
        reconcile_cluster_role_bindings(&self.store, &self.catalog.cluster_role_bindings(&ctx), &[])
            .await?;

        reconcile_stateful_sets(&self.store, &self.catalog.stateful_sets(&ctx), ns, &owned(&ctx))
            .await?;

        if status.extended_health.cloud_provider_infrastructure != HealthStatus::Up {
            debug!("Cloud provider infrastructure of cluster {} is not ready", name);
            return Ok(Action::requeue(
                INFRASTRUCTURE_REQUEUE,
                RequeueReason::InfrastructurePending,
            ));
        }

        reconcile_config_maps(&self.store, &self.catalog.config_maps(&ctx), ns, &owned(&ctx))
            .await?;
        reconcile_deployments(&self.store, &self.catalog.deployments(&ctx), ns, &owned(&ctx))
            .await?;
        reconcile_cron_jobs(&self.store, &self.catalog.cron_jobs(&ctx), ns, &owned(&ctx)).await?;
        reconcile_pod_disruption_budgets(
            &self.store,
            &self.catalog.pod_disruption_budgets(&ctx),
            ns,
            &owned(&ctx),
        )
        .await?;
        if ctx.enable_vpa {
            reconcile_vertical_pod_autoscalers(
                &self.store,
                &self.catalog.vertical_pod_autoscalers(&ctx),
                ns,
                &owned(&ctx),
            )
            .await?;
        }
        if ctx.enable_backups {
            update_cluster(&self.store, cluster, |c| {
                c.add_finalizer(finalizers::BACKUP_CLEANUP);
            })
            .await?;
            reconcile_backup_configs(
                &self.store,
                &self.catalog.backup_configs(&ctx),
                ns,
                &owned(&ctx),
            )
            .await?;
        }

        self.sync_policy_engine(&ctx).await?;

        if status.extended_health.apiserver != HealthStatus::Up {
            debug!("API server of cluster {} is not up yet", name);
            return Ok(Action::requeue(APISERVER_REQUEUE, RequeueReason::ApiserverPending));
        }
        if !cluster.has_finalizer(finalizers::NODE_DELETION) {
            if !is_reachable(self.connector.as_ref(), cluster).await {
                return Ok(Action::requeue(UNREACHABLE_REQUEUE, RequeueReason::Unreachable));
            }
            update_cluster(&self.store, cluster, |c| {
                c.add_finalizer(finalizers::NODE_DELETION);
            })
            .await?;
            info!("Cluster {} is reachable, node cleanup enabled", name);
        }

        Ok(Action::Converged)
    }

    /// Prepares provider infrastructure until the provider reports it ready.
    /// The cleanup finalizer goes on before the first provider call.
    async fn ensure_infrastructure(&self, cluster: &mut ManagedCluster) -> Result<(), ControllerError> {
        let provider = self.cloud_providers.for_cluster(cluster)?;
        if provider.needs_cleanup() {
            update_cluster(&self.store, cluster, |c| {
                c.add_finalizer(finalizers::CLOUD_INFRASTRUCTURE_CLEANUP);
            })
            .await?;
        }
        let status = cluster.status_or_default();
        if status.is_condition_true(condition_types::CLOUD_PROVIDER_INFRASTRUCTURE_READY) {
            return Ok(());
        }

        match provider.initialize(cluster).await? {
            InfrastructureState::Ready => {
                update_cluster(&self.store, cluster, |c| {
                    c.status.get_or_insert_with(Default::default).set_condition(
                        condition_types::CLOUD_PROVIDER_INFRASTRUCTURE_READY,
                        true,
                        "",
                        "Cloud provider infrastructure is ready",
                    );
                })
                .await?;
            }
            InfrastructureState::Provisioning => {
                debug!(
                    "Cloud provider infrastructure of cluster {} is provisioning",
                    cluster.metadata.name.as_deref().unwrap_or("<unknown>")
                );
            }
        }
        Ok(())
    }

    /// Ensures the policy engine when enabled, removes it otherwise
    async fn sync_policy_engine(&self, ctx: &Arc<ClusterContext>) -> Result<(), ControllerError> {
        let ns = ctx.namespace.as_str();
        let service_accounts = self.catalog.policy_engine_service_accounts(ctx);
        let deployments = self.catalog.policy_engine_deployments(ctx);

        if ctx.policy_engine_enabled {
            reconcile_service_accounts(&self.store, &service_accounts, ns, &owned(ctx)).await?;
            reconcile_deployments(&self.store, &deployments, ns, &owned(ctx)).await?;
        } else {
            let removed =
                delete_objects_if_present::<Deployment>(&self.store, Some(ns), &names(&deployments))
                    .await?
                    + delete_objects_if_present::<ServiceAccount>(
                        &self.store,
                        Some(ns),
                        &names(&service_accounts),
                    )
                    .await?;
            if removed > 0 {
                info!("Removed policy engine of cluster {}", ctx.cluster_name);
            }
        }
        Ok(())
    }
}
