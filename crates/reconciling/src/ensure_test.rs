//! Unit tests for the ensure engine and batch reconcilers

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use store_client::{MockObjectStore, Operation, Store};

use crate::*;

const NS: &str = "cluster-abc";

fn data_creator(value: &'static str) -> ObjectCreator<ConfigMap> {
    Arc::new(move |mut cm: ConfigMap| {
        cm.data = Some(BTreeMap::from([("config".to_string(), value.to_string())]));
        Ok(cm)
    })
}

fn setup() -> (MockObjectStore, Store) {
    let mock = MockObjectStore::new();
    let store = Store::new(mock.clone());
    (mock, store)
}

#[tokio::test]
async fn test_ensure_writes_once_then_never() {
    let (mock, store) = setup();
    let create = data_creator("a");

    let first = ensure_named_object(&store, Some(NS), "cloud-config", &create).await.unwrap();
    let second = ensure_named_object(&store, Some(NS), "cloud-config", &create).await.unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::Unchanged);
    assert_eq!(mock.counters().total(), 1);
}

#[tokio::test]
async fn test_ensure_ignores_unrelated_resource_version_bumps() {
    let (mock, store) = setup();
    let create = data_creator("a");
    ensure_named_object(&store, Some(NS), "cloud-config", &create).await.unwrap();

    // Another writer touches the object without changing its content
    let current: ConfigMap = mock.object(Some(NS), "cloud-config").unwrap();
    store.update(&current).await.unwrap();
    mock.reset_counters();

    let outcome = ensure_named_object(&store, Some(NS), "cloud-config", &create).await.unwrap();
    assert_eq!(outcome, EnsureOutcome::Unchanged);
    assert_eq!(mock.counters().total(), 0);
}

#[tokio::test]
async fn test_ensure_updates_changed_object() {
    let (mock, store) = setup();
    ensure_named_object(&store, Some(NS), "cloud-config", &data_creator("a")).await.unwrap();

    let outcome = ensure_named_object(&store, Some(NS), "cloud-config", &data_creator("b"))
        .await
        .unwrap();
    assert_eq!(outcome, EnsureOutcome::Updated);
    assert_eq!(mock.counters().updates, 1);

    let stored: ConfigMap = mock.object(Some(NS), "cloud-config").unwrap();
    assert_eq!(stored.data.unwrap()["config"], "b");
}

#[tokio::test]
async fn test_ensure_forces_identity() {
    let (mock, store) = setup();
    let create: ObjectCreator<ConfigMap> = Arc::new(|mut cm: ConfigMap| {
        cm.metadata.name = Some("wrong".to_string());
        cm.metadata.namespace = Some("elsewhere".to_string());
        Ok(cm)
    });

    ensure_named_object(&store, Some(NS), "cloud-config", &create).await.unwrap();
    assert!(mock.object::<ConfigMap>(Some(NS), "cloud-config").is_some());
    assert_eq!(mock.count::<ConfigMap>(None), 1);
}

#[tokio::test]
async fn test_build_error_is_fatal_and_writes_nothing() {
    let (mock, store) = setup();
    let create: ObjectCreator<ConfigMap> = Arc::new(|_| Err(BuildError::new("missing CA")));

    let err = ensure_named_object(&store, Some(NS), "cloud-config", &create)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Build { .. }));
    assert!(err.to_string().contains("missing CA"));
    assert_eq!(mock.counters().total(), 0);
}

#[tokio::test]
async fn test_read_error_is_propagated() {
    let (mock, store) = setup();
    mock.fail_next(Operation::Get, "ConfigMap", "connection reset");

    let err = ensure_named_object(&store, Some(NS), "cloud-config", &data_creator("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Read { .. }));
}

#[tokio::test]
async fn test_version_conflict_is_surfaced() {
    let (mock, store) = setup();
    ensure_named_object(&store, Some(NS), "cloud-config", &data_creator("a")).await.unwrap();
    mock.conflict_next(Operation::Update, "ConfigMap");

    let err = ensure_named_object(&store, Some(NS), "cloud-config", &data_creator("b"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    // nothing was merged or silently written
    let stored: ConfigMap = mock.object(Some(NS), "cloud-config").unwrap();
    assert_eq!(stored.data.unwrap()["config"], "a");
}

#[tokio::test]
async fn test_batch_is_fail_fast() {
    let (mock, store) = setup();
    let getters = vec![
        named_creator::<ConfigMap, _>("first", |cm| Ok(cm)),
        named_creator::<ConfigMap, _>("broken", |_| Err(BuildError::new("nope"))),
        named_creator::<ConfigMap, _>("third", |cm| Ok(cm)),
    ];

    let err = reconcile_config_maps(&store, &getters, NS, &[]).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Build { ref name, .. } if name.ends_with("broken")));
    assert!(mock.object::<ConfigMap>(Some(NS), "first").is_some());
    assert!(mock.object::<ConfigMap>(Some(NS), "third").is_none());
}

#[tokio::test]
async fn test_batch_applies_owner_reference() {
    let (mock, store) = setup();
    let owner = OwnerReference {
        api_version: "clusterkit.io/v1alpha1".to_string(),
        kind: "ManagedCluster".to_string(),
        name: "abc".to_string(),
        uid: "1234".to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };
    let getters = vec![named_creator::<ConfigMap, _>("cloud-config", |cm| Ok(cm))];
    let modifiers = vec![owner_reference_modifier::<ConfigMap>(owner)];

    let summary = reconcile_config_maps(&store, &getters, NS, &modifiers).await.unwrap();
    assert_eq!(summary.created, 1);
    let summary = reconcile_config_maps(&store, &getters, NS, &modifiers).await.unwrap();
    assert_eq!(summary.writes(), 0);

    let stored: ConfigMap = mock.object(Some(NS), "cloud-config").unwrap();
    let refs = stored.metadata.owner_references.unwrap();
    assert_eq!(refs[0].kind, "ManagedCluster");
}

#[tokio::test]
async fn test_delete_if_present_counts_only_existing() {
    let (_mock, store) = setup();
    ensure_named_object(&store, Some(NS), "a", &data_creator("a")).await.unwrap();

    let names = vec!["a".to_string(), "b".to_string()];
    let deleted = delete_objects_if_present::<ConfigMap>(&store, Some(NS), &names).await.unwrap();
    assert_eq!(deleted, 1);
    let deleted = delete_objects_if_present::<ConfigMap>(&store, Some(NS), &names).await.unwrap();
    assert_eq!(deleted, 0);
}
