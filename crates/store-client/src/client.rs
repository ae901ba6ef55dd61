//! Kubernetes-backed object store.

use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::error::StoreError;
use crate::merge::merge_patch;
use crate::store_trait::{ObjectKey, ObjectStoreTrait};

/// Object store talking to a Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl std::fmt::Debug for KubeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectStore").finish_non_exhaustive()
    }
}

impl KubeObjectStore {
    /// Backs the store with the given API client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn identity(object: &DynamicObject) -> Result<ObjectKey, StoreError> {
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

#[async_trait::async_trait]
impl ObjectStoreTrait for KubeObjectStore {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError> {
        self.api(resource, key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let list = self
            .api(resource, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, namespace.unwrap_or("*")))?;
        Ok(list.items)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = identity(object)?;
        debug!("Creating {} {}", resource.kind, key.display());
        self.api(resource, key.namespace.as_deref())
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = identity(object)?;
        debug!("Replacing {} {}", resource.kind, key.display());
        self.api(resource, key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = identity(object)?;
        let api = self.api(resource, key.namespace.as_deref());
        let current = api
            .get_status(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))?;

        let null = serde_json::Value::Null;
        let old_status = current.data.get("status").unwrap_or(&null);
        let new_status = object.data.get("status").unwrap_or(&null);

        // resourceVersion in a merge patch turns the write into a CAS
        let patch = json!({
            "metadata": { "resourceVersion": object.metadata.resource_version },
            "status": merge_patch(old_status, new_status),
        });
        debug!("Patching status of {} {}", resource.kind, key.display());
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        debug!("Deleting {} {}", resource.kind, key.display());
        self.api(resource, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, &resource.kind, &key.display()))
    }
}
