//! Finalizer-driven deletion against the mock store.

use crds::{BackupConfig, ManagedCluster, SecretReference, finalizers};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::ControllerConfig;
use crate::reconciler::{Action, RequeueReason};
use crate::resources::{APISERVER_DEPLOYMENT, auth_delegator_binding_name};
use crate::test_utils::{FAKE_PROVIDER, Harness, seed_cluster, test_cluster, test_config};

const NS: &str = "cluster-abc";
const CREDENTIALS: &str = "credential-abc";

fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn credentials_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(CREDENTIALS.to_string()),
            namespace: Some("clusterkit".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn is_deleting_requeue(action: &Action) -> bool {
    matches!(
        action,
        Action::Requeue {
            reason: RequeueReason::Deleting,
            ..
        }
    )
}

/// Converged cluster "abc" holding every cleanup finalizer
async fn converged_cluster() -> Harness {
    let config = ControllerConfig {
        enable_etcd_backups: true,
        ..test_config()
    };
    let h = Harness::new(config);
    let mut cluster = test_cluster("abc");
    cluster.spec.cloud.provider = FAKE_PROVIDER.to_string();
    cluster.spec.credentials_reference = Some(SecretReference {
        name: CREDENTIALS.to_string(),
        namespace: None,
    });
    seed_cluster(&h.mock, cluster);
    h.mock.insert(&credentials_secret());

    h.reconcile("abc").await;
    h.reconcile("abc").await;
    h.mark_apiserver_ready(NS);
    assert_eq!(h.reconcile("abc").await, Action::Converged);

    let cluster = h.cluster("abc");
    for token in finalizers::CLEANUP_ORDER {
        assert!(cluster.has_finalizer(token), "missing finalizer {token}");
    }
    h
}

#[tokio::test]
async fn test_deletion_runs_cleanup_in_order() {
    let h = converged_cluster().await;
    h.user.insert(&node("worker-1"));
    h.user.insert(&node("worker-2"));
    assert!(h.mock.count::<BackupConfig>(Some(NS)) > 0);

    h.store().delete::<ManagedCluster>(None, "abc").await.unwrap();
    assert!(h.cluster("abc").is_deleting());

    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    assert_eq!(h.user.count::<Node>(None), 0);
    assert!(!h.cluster("abc").has_finalizer(finalizers::NODE_DELETION));

    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    assert_eq!(h.mock.count::<BackupConfig>(Some(NS)), 0);
    assert!(!h.cluster("abc").has_finalizer(finalizers::BACKUP_CLEANUP));

    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    assert!(h.mock.object::<Secret>(Some("clusterkit"), CREDENTIALS).is_none());
    assert!(!h.cluster("abc").has_finalizer(finalizers::CREDENTIALS_CLEANUP));

    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    assert_eq!(h.provider.cleanup_count(), 1);
    assert!(!h.cluster("abc").has_finalizer(finalizers::CLOUD_INFRASTRUCTURE_CLEANUP));

    // the namespace is still around until the last unit
    assert!(h.mock.object::<Namespace>(None, NS).is_some());
    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    assert!(h.mock.object::<Namespace>(None, NS).is_none());
    assert!(
        h.mock
            .object::<ClusterRoleBinding>(None, &auth_delegator_binding_name(NS))
            .is_none()
    );
    assert!(h.mock.object::<ManagedCluster>(None, "abc").is_none());

    assert_eq!(h.reconcile("abc").await, Action::Skipped);
}

#[tokio::test]
async fn test_failed_unit_keeps_its_finalizer() {
    let h = converged_cluster().await;
    h.store().delete::<ManagedCluster>(None, "abc").await.unwrap();
    h.connector.set(None);

    // deleting clusters requeue on a fixed delay instead of erroring
    let action = h.reconciler.reconcile("abc").await.unwrap();
    assert!(is_deleting_requeue(&action));

    let cluster = h.cluster("abc");
    assert!(cluster.has_finalizer(finalizers::NODE_DELETION));
    assert_eq!(
        cluster.status_or_default().error_reason.as_deref(),
        Some("UserClusterError")
    );
    assert!(
        h.events
            .events()
            .iter()
            .any(|(_, reason, _)| reason == "ReconcilingError")
    );

    h.connector.set(Some(h.user_store()));
    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    let cluster = h.cluster("abc");
    assert!(!cluster.has_finalizer(finalizers::NODE_DELETION));
    assert!(cluster.status_or_default().error_reason.is_none());
}

#[tokio::test]
async fn test_foreign_finalizers_are_left_alone() {
    let h = Harness::new(test_config());
    let mut cluster = test_cluster("abc");
    cluster.metadata.finalizers = Some(vec![
        "example.com/keep".to_string(),
        finalizers::NAMESPACE_CLEANUP.to_string(),
    ]);
    seed_cluster(&h.mock, cluster);
    h.store().delete::<ManagedCluster>(None, "abc").await.unwrap();

    assert!(is_deleting_requeue(&h.reconcile("abc").await));
    let cluster = h.cluster("abc");
    assert_eq!(
        cluster.metadata.finalizers.as_deref(),
        Some(&["example.com/keep".to_string()][..])
    );

    h.mock.reset_counters();
    assert_eq!(h.reconcile("abc").await, Action::Skipped);
    assert_eq!(h.mock.counters().total(), 0);
}

#[tokio::test]
async fn test_deletion_does_not_recreate_objects() {
    let h = converged_cluster().await;
    h.store().delete::<ManagedCluster>(None, "abc").await.unwrap();
    h.mock.reset_counters();

    h.reconcile("abc").await;
    assert_eq!(h.mock.counters().creates, 0);
    assert!(h.mock.object::<Deployment>(Some(NS), APISERVER_DEPLOYMENT).is_some());
}
