//! Convergence passes against the mock store.

use crds::{
    BackupConfig, ExposeStrategy, HealthStatus, ManagedCluster, PolicyEngineSettings,
    VerticalPodAutoscaler, condition_types, finalizers,
};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use store_client::Operation;

use crate::cloud::InfrastructureState;
use crate::events::EventType;
use crate::reconciler::{Action, RequeueReason};
use crate::resources::{
    APISERVER_DEPLOYMENT, APISERVER_SERVICE, CLOUD_CONFIG, ETCD_STATEFULSET, POLICY_CONTROLLER,
    auth_delegator_binding_name,
};
use crate::test_utils::{FAKE_PROVIDER, Harness, seed_cluster, test_cluster, test_config};

const NS: &str = "cluster-abc";

fn reason(action: &Action) -> Option<RequeueReason> {
    match action {
        Action::Requeue { reason, .. } => Some(*reason),
        _ => None,
    }
}

/// Drives a new cluster "abc" to the point where only the API server is
/// missing
async fn converge_to_apiserver_gate(h: &Harness) {
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::InfrastructurePending)
    );
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::ApiserverPending)
    );
}

async fn converge_fully(h: &Harness) {
    converge_to_apiserver_gate(h).await;
    h.mark_apiserver_ready(NS);
    assert_eq!(h.reconcile("abc").await, Action::Converged);
}

#[tokio::test]
async fn test_first_pass_stops_at_infrastructure_gate() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));

    let action = h.reconcile("abc").await;
    assert_eq!(reason(&action), Some(RequeueReason::InfrastructurePending));

    let cluster = h.cluster("abc");
    let status = cluster.status.clone().unwrap();
    assert_eq!(status.namespace_name, NS);
    assert!(status.is_condition_true(condition_types::UPDATE_IN_PROGRESS));
    assert!(status.is_condition_true(condition_types::CLOUD_PROVIDER_INFRASTRUCTURE_READY));
    assert!(cluster.has_finalizer(finalizers::NAMESPACE_CLEANUP));
    assert!(!cluster.has_finalizer(finalizers::NODE_DELETION));
    assert_eq!(cluster.spec.cluster_network.services_cidr_blocks, ["10.240.16.0/20"]);

    assert_eq!(status.address.external_name, "abc.europe-west3-c.dev.kubermatic.io");
    assert_eq!(status.address.ip, "34.89.181.151");
    assert_eq!(status.address.port, 443);
    assert_eq!(status.address.url, "https://abc.europe-west3-c.dev.kubermatic.io:443");

    // steps before the gate ran, steps after it did not
    assert!(h.mock.object::<Namespace>(None, NS).is_some());
    assert!(h.mock.object::<Service>(Some(NS), APISERVER_SERVICE).is_some());
    assert!(h.mock.count::<Secret>(Some(NS)) > 0);
    assert!(h.mock.object::<StatefulSet>(Some(NS), ETCD_STATEFULSET).is_some());
    assert!(
        h.mock
            .object::<ClusterRoleBinding>(None, &auth_delegator_binding_name(NS))
            .is_some()
    );
    assert!(h.mock.object::<ConfigMap>(Some(NS), CLOUD_CONFIG).is_none());
    assert_eq!(h.mock.count::<Deployment>(Some(NS)), 0);
}

#[tokio::test]
async fn test_owned_objects_carry_controller_reference() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_to_apiserver_gate(&h).await;

    let deployment: Deployment = h.mock.object(Some(NS), APISERVER_DEPLOYMENT).unwrap();
    let owner = &deployment.metadata.owner_references.unwrap()[0];
    assert_eq!(owner.kind, "ManagedCluster");
    assert_eq!(owner.name, "abc");
    assert_eq!(owner.uid, "uid-abc");
    assert_eq!(owner.controller, Some(true));
}

#[tokio::test]
async fn test_cluster_converges_once_apiserver_is_up() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_fully(&h).await;

    let cluster = h.cluster("abc");
    assert!(cluster.has_finalizer(finalizers::NODE_DELETION));
    let status = cluster.status.unwrap();
    assert_eq!(status.extended_health.apiserver, HealthStatus::Up);
    assert!(status.is_condition_true(condition_types::RECONCILING_SUCCESS));
    assert!(status.error_reason.is_none());
    assert!(h.mock.object::<ConfigMap>(Some(NS), CLOUD_CONFIG).is_some());
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn test_node_cleanup_waits_for_reachable_user_cluster() {
    let h = Harness::new(test_config());
    h.connector.set(None);
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_to_apiserver_gate(&h).await;
    h.mark_apiserver_ready(NS);

    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::Unreachable)
    );
    assert!(!h.cluster("abc").has_finalizer(finalizers::NODE_DELETION));

    h.connector.set(Some(h.user_store()));
    assert_eq!(h.reconcile("abc").await, Action::Converged);
    assert!(h.cluster("abc").has_finalizer(finalizers::NODE_DELETION));
}

#[tokio::test]
async fn test_converged_cluster_pass_writes_nothing() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_fully(&h).await;
    // settle the writes caused by the replaced API server Deployment
    assert_eq!(h.reconcile("abc").await, Action::Converged);

    h.mock.reset_counters();
    assert_eq!(h.reconcile("abc").await, Action::Converged);
    assert_eq!(h.mock.counters().total(), 0);
}

#[tokio::test]
async fn test_admission_limit_defers_new_cluster() {
    let h = Harness::new(test_config());
    for name in ["busy-1", "busy-2", "busy-3"] {
        let mut cluster = test_cluster(name);
        cluster.status.get_or_insert_with(Default::default).set_condition(
            condition_types::UPDATE_IN_PROGRESS,
            true,
            "Admitted",
            "",
        );
        seed_cluster(&h.mock, cluster);
    }
    seed_cluster(&h.mock, test_cluster("abc"));

    let action = h.reconcile("abc").await;
    assert_eq!(reason(&action), Some(RequeueReason::NotAdmitted));
    assert_eq!(h.mock.count::<Namespace>(None), 0);
    let status = h.cluster("abc").status_or_default();
    assert!(!status.is_condition_true(condition_types::UPDATE_IN_PROGRESS));
    assert!(status.namespace_name.is_empty());
}

#[tokio::test]
async fn test_deferred_pass_keeps_recorded_error() {
    let h = Harness::new(test_config());
    for name in ["busy-1", "busy-2", "busy-3"] {
        let mut cluster = test_cluster(name);
        cluster.status.get_or_insert_with(Default::default).set_condition(
            condition_types::UPDATE_IN_PROGRESS,
            true,
            "Admitted",
            "",
        );
        seed_cluster(&h.mock, cluster);
    }
    seed_cluster(&h.mock, test_cluster("abc"));
    h.reconcile("abc").await;

    let mut cluster = h.cluster("abc");
    let status = cluster.status.get_or_insert_with(Default::default);
    status.error_reason = Some("StoreWriteError".to_string());
    status.error_message = Some("etcdserver: request timed out".to_string());
    status.set_condition(
        condition_types::RECONCILING_SUCCESS,
        false,
        "StoreWriteError",
        "etcdserver: request timed out",
    );
    h.mock.insert(&cluster);
    h.mock.reset_counters();

    let action = h.reconcile("abc").await;
    assert_eq!(reason(&action), Some(RequeueReason::NotAdmitted));
    assert_eq!(h.mock.counters().total(), 0);
    let status = h.cluster("abc").status_or_default();
    assert_eq!(status.error_reason.as_deref(), Some("StoreWriteError"));
    assert!(!status.is_condition_true(condition_types::RECONCILING_SUCCESS));
}

#[tokio::test]
async fn test_store_failure_is_recorded_and_cleared() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));
    h.mock.fail_next(Operation::Create, "Service", "etcdserver: request timed out");

    let err = h.reconciler.reconcile("abc").await.unwrap_err();
    assert_eq!(err.reason(), "StoreWriteError");

    let status = h.cluster("abc").status_or_default();
    assert_eq!(status.error_reason.as_deref(), Some("StoreWriteError"));
    assert!(status.error_message.as_deref().unwrap().contains("request timed out"));
    assert!(!status.is_condition_true(condition_types::RECONCILING_SUCCESS));

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, EventType::Warning);
    assert_eq!(events[0].1, "ReconcilingError");

    // infrastructure became ready during the failed pass
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::ApiserverPending)
    );
    let status = h.cluster("abc").status_or_default();
    assert!(status.error_reason.is_none());
    assert!(status.error_message.is_none());
    assert!(status.is_condition_true(condition_types::RECONCILING_SUCCESS));
}

#[tokio::test]
async fn test_load_balancer_without_ingress_waits_for_address() {
    let h = Harness::new(test_config());
    let mut cluster = test_cluster("abc");
    cluster.spec.expose_strategy = ExposeStrategy::LoadBalancer;
    seed_cluster(&h.mock, cluster);

    let action = h.reconcile("abc").await;
    assert_eq!(reason(&action), Some(RequeueReason::AddressPending));
    assert!(h.mock.object::<Service>(Some(NS), APISERVER_SERVICE).is_some());
    assert_eq!(h.mock.count::<Secret>(Some(NS)), 0);
    assert!(h.cluster("abc").status_or_default().address.ip.is_empty());
}

#[tokio::test]
async fn test_provisioning_infrastructure_holds_workloads_back() {
    let h = Harness::new(test_config());
    h.provider.set_state(InfrastructureState::Provisioning);
    let mut cluster = test_cluster("abc");
    cluster.spec.cloud.provider = FAKE_PROVIDER.to_string();
    seed_cluster(&h.mock, cluster);

    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::InfrastructurePending)
    );
    let cluster = h.cluster("abc");
    assert!(cluster.has_finalizer(finalizers::CLOUD_INFRASTRUCTURE_CLEANUP));
    assert!(
        !cluster
            .status_or_default()
            .is_condition_true(condition_types::CLOUD_PROVIDER_INFRASTRUCTURE_READY)
    );

    // still provisioning: nothing past the gate
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::InfrastructurePending)
    );
    assert_eq!(h.mock.count::<Deployment>(Some(NS)), 0);

    h.provider.set_state(InfrastructureState::Ready);
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::InfrastructurePending)
    );
    assert_eq!(
        reason(&h.reconcile("abc").await),
        Some(RequeueReason::ApiserverPending)
    );
    assert!(h.mock.count::<Deployment>(Some(NS)) > 0);
}

#[tokio::test]
async fn test_policy_engine_follows_cluster_setting() {
    let h = Harness::new(test_config());
    let mut cluster = test_cluster("abc");
    cluster.spec.policy_engine = Some(PolicyEngineSettings { enabled: true });
    seed_cluster(&h.mock, cluster);
    converge_to_apiserver_gate(&h).await;
    assert!(h.mock.object::<Deployment>(Some(NS), POLICY_CONTROLLER).is_some());

    let mut cluster: ManagedCluster = h.cluster("abc");
    cluster.spec.policy_engine = Some(PolicyEngineSettings { enabled: false });
    h.mock.insert(&cluster);

    h.reconcile("abc").await;
    assert!(h.mock.object::<Deployment>(Some(NS), POLICY_CONTROLLER).is_none());
    assert!(h.mock.object::<Deployment>(Some(NS), APISERVER_DEPLOYMENT).is_some());
}

#[tokio::test]
async fn test_optional_addons_follow_controller_settings() {
    let config = crate::config::ControllerConfig {
        enable_vpa: true,
        enable_etcd_backups: true,
        ..test_config()
    };
    let h = Harness::new(config);
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_to_apiserver_gate(&h).await;

    assert!(h.mock.count::<VerticalPodAutoscaler>(Some(NS)) > 0);
    assert!(h.mock.count::<BackupConfig>(Some(NS)) > 0);
    assert!(h.cluster("abc").has_finalizer(finalizers::BACKUP_CLEANUP));
}

#[tokio::test]
async fn test_addons_are_skipped_by_default() {
    let h = Harness::new(test_config());
    seed_cluster(&h.mock, test_cluster("abc"));
    converge_to_apiserver_gate(&h).await;

    assert_eq!(h.mock.count::<VerticalPodAutoscaler>(Some(NS)), 0);
    assert_eq!(h.mock.count::<BackupConfig>(Some(NS)), 0);
    assert!(!h.cluster("abc").has_finalizer(finalizers::BACKUP_CLEANUP));
}
