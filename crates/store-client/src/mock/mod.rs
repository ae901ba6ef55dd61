//! Mock object store for unit testing
//!
//! This module provides an in-memory implementation of `ObjectStoreTrait`
//! that can be used in unit tests without a running API server.
//!
//! It follows the API server semantics the controllers rely on:
//! - `create` ignores `status`, assigns uid and resourceVersion
//! - `update` and `update_status` are guarded by resourceVersion
//! - `update` never touches status, `update_status` never touches the rest
//! - `delete` of an object with finalizers only sets `deletionTimestamp`;
//!   the object disappears once an update leaves its finalizer list empty
//! - deleting a Namespace removes every object inside it
//!
//! Every successful write is counted per operation so tests can assert
//! idempotence, and one-shot faults can be injected per operation and kind.

mod faults;

pub use faults::Operation;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{StoreObject, api_resource, from_dynamic, to_dynamic};
use crate::store_trait::{ObjectKey, ObjectStoreTrait};
use faults::Fault;

/// Successful writes seen by the mock, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounters {
    /// Objects created
    pub creates: usize,
    /// Full-object updates
    pub updates: usize,
    /// Status subresource updates
    pub status_updates: usize,
    /// Deletes, including those that only set a deletion timestamp
    pub deletes: usize,
}

impl WriteCounters {
    /// Writes of any kind
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StoredKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<StoredKey, Value>,
    next_version: u64,
    counters: WriteCounters,
    faults: Vec<Fault>,
}

/// Mock object store for testing
#[derive(Debug, Clone, Default)]
pub struct MockObjectStore {
    state: Arc<Mutex<MockState>>,
}

fn kind_key(resource: &ApiResource) -> String {
    format!("{}/{}", resource.api_version, resource.kind)
}

fn stored_key(resource: &ApiResource, key: &ObjectKey) -> StoredKey {
    StoredKey {
        kind: kind_key(resource),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
    }
}

fn object_key(object: &DynamicObject) -> Result<ObjectKey, StoreError> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("object has no metadata.name".to_string()))?;
    Ok(ObjectKey {
        namespace: object.metadata.namespace.clone(),
        name,
    })
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

fn finalizers_empty(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_none_or(Vec::is_empty)
}

fn conflict(resource: &ApiResource, key: &ObjectKey, message: &str) -> StoreError {
    StoreError::Conflict {
        kind: resource.kind.clone(),
        name: key.display(),
        message: message.to_string(),
    }
}

fn not_found(resource: &ApiResource, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: resource.kind.clone(),
        name: key.display(),
    }
}

impl MockState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_fault(&mut self, op: Operation, resource: &ApiResource) -> Option<StoreError> {
        let index = self
            .faults
            .iter()
            .position(|f| f.matches(op, &resource.kind))?;
        Some(self.faults.remove(index).into_error(resource))
    }

    /// Compare-and-swap check against the stored object.
    fn check_version(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        stored: &Value,
        incoming: &DynamicObject,
    ) -> Result<(), StoreError> {
        match incoming.metadata.resource_version.as_deref() {
            Some(version) if Some(version) != resource_version(stored) => Err(conflict(
                resource,
                key,
                "the object has been modified; please apply your changes to the latest version",
            )),
            _ => Ok(()),
        }
    }
}

impl MockObjectStore {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object (for test setup). Status is kept, nothing is counted.
    pub fn insert<K: StoreObject>(&self, object: &K) {
        let resource = api_resource::<K>();
        let Ok(dynamic) = to_dynamic(object) else {
            return;
        };
        let Ok(key) = object_key(&dynamic) else {
            return;
        };
        let Ok(mut value) = serde_json::to_value(&dynamic) else {
            return;
        };
        let mut state = self.state();
        let version = state.bump_version();
        value["metadata"]["resourceVersion"] = Value::String(version);
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        }
        state.objects.insert(stored_key(&resource, &key), value);
    }

    /// Typed read of the stored object (for assertions)
    pub fn object<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = stored_key(&api_resource::<K>(), &ObjectKey::new(namespace, name));
        let value = self.state().objects.get(&key).cloned()?;
        let dynamic: DynamicObject = serde_json::from_value(value).ok()?;
        from_dynamic(dynamic).ok()
    }

    /// Number of stored objects of a kind, optionally within a namespace
    pub fn count<K: StoreObject>(&self, namespace: Option<&str>) -> usize {
        let kind = kind_key(&api_resource::<K>());
        self.state()
            .objects
            .keys()
            .filter(|k| k.kind == kind && (namespace.is_none() || k.namespace.as_deref() == namespace))
            .count()
    }

    /// Snapshot of the write counters
    pub fn counters(&self) -> WriteCounters {
        self.state().counters
    }

    /// Zeroes the write counters, typically after seeding
    pub fn reset_counters(&self) {
        self.state().counters = WriteCounters::default();
    }

    /// Make the next matching call fail with a backend error
    pub fn fail_next(&self, op: Operation, kind: &str, message: &str) {
        self.state().faults.push(Fault::backend(op, kind, message));
    }

    /// Make the next matching write fail with a resourceVersion conflict
    pub fn conflict_next(&self, op: Operation, kind: &str) {
        self.state().faults.push(Fault::conflict(op, kind));
    }
}

#[async_trait::async_trait]
impl ObjectStoreTrait for MockObjectStore {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::Get, resource) {
            return Err(error);
        }
        match state.objects.get(&stored_key(resource, key)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::List, resource) {
            return Err(error);
        }
        let kind = kind_key(resource);
        state
            .objects
            .iter()
            .filter(|(k, _)| {
                k.kind == kind && (namespace.is_none() || k.namespace.as_deref() == namespace)
            })
            .map(|(_, v)| Ok(serde_json::from_value(v.clone())?))
            .collect()
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(object)?;
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::Create, resource) {
            return Err(error);
        }
        let stored = stored_key(resource, &key);
        if state.objects.contains_key(&stored) {
            return Err(conflict(resource, &key, "already exists"));
        }

        let mut value = serde_json::to_value(object)?;
        if let Value::Object(map) = &mut value {
            map.remove("status");
        }
        let version = state.bump_version();
        value["metadata"]["resourceVersion"] = Value::String(version);
        value["metadata"]["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        value["metadata"]["generation"] = Value::from(1);

        state.objects.insert(stored, value.clone());
        state.counters.creates += 1;
        Ok(serde_json::from_value(value)?)
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(object)?;
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::Update, resource) {
            return Err(error);
        }
        let stored_key = stored_key(resource, &key);
        let Some(stored) = state.objects.get(&stored_key).cloned() else {
            return Err(not_found(resource, &key));
        };
        state.check_version(resource, &key, &stored, object)?;

        let mut value = serde_json::to_value(object)?;
        // status is only writable through update_status
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Value::Object(map) = &mut value {
                    map.remove("status");
                }
            }
        }
        for immutable in ["uid", "deletionTimestamp", "creationTimestamp"] {
            if let Some(v) = stored["metadata"].get(immutable) {
                value["metadata"][immutable] = v.clone();
            }
        }
        let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        let spec_changed = stored.get("spec") != value.get("spec");
        value["metadata"]["generation"] =
            Value::from(if spec_changed { generation + 1 } else { generation });
        let version = state.bump_version();
        value["metadata"]["resourceVersion"] = Value::String(version);

        state.counters.updates += 1;
        let deleting = !stored["metadata"]["deletionTimestamp"].is_null();
        if deleting && finalizers_empty(&value) {
            state.objects.remove(&stored_key);
        } else {
            state.objects.insert(stored_key, value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(object)?;
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::UpdateStatus, resource) {
            return Err(error);
        }
        let stored_key = stored_key(resource, &key);
        let Some(mut stored) = state.objects.get(&stored_key).cloned() else {
            return Err(not_found(resource, &key));
        };
        state.check_version(resource, &key, &stored, object)?;

        match object.data.get("status") {
            Some(status) if !status.is_null() => stored["status"] = status.clone(),
            _ => {
                if let Value::Object(map) = &mut stored {
                    map.remove("status");
                }
            }
        }
        let version = state.bump_version();
        stored["metadata"]["resourceVersion"] = Value::String(version);

        state.objects.insert(stored_key, stored.clone());
        state.counters.status_updates += 1;
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Some(error) = state.take_fault(Operation::Delete, resource) {
            return Err(error);
        }
        let stored_key = stored_key(resource, key);
        let Some(mut stored) = state.objects.get(&stored_key).cloned() else {
            return Err(not_found(resource, key));
        };
        state.counters.deletes += 1;

        if !finalizers_empty(&stored) {
            if stored["metadata"]["deletionTimestamp"].is_null() {
                stored["metadata"]["deletionTimestamp"] = Value::String(
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                );
                let version = state.bump_version();
                stored["metadata"]["resourceVersion"] = Value::String(version);
                state.objects.insert(stored_key, stored);
            }
            return Ok(());
        }

        state.objects.remove(&stored_key);
        if resource.kind == "Namespace" && resource.group.is_empty() {
            let namespace = Some(key.name.clone());
            state.objects.retain(|k, _| k.namespace != namespace);
        }
        Ok(())
    }
}
