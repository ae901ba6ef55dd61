//! Typed facade over an [`ObjectStoreTrait`] backend.

use std::fmt;
use std::sync::Arc;

use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::store_trait::{ObjectKey, ObjectStoreTrait};

/// Any statically typed Kubernetes object the store can carry.
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Cheaply cloneable handle to an object store.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn ObjectStoreTrait>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Wraps a concrete backend
    pub fn new(backend: impl ObjectStoreTrait + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Shares an already type-erased backend
    pub fn from_backend(backend: Arc<dyn ObjectStoreTrait>) -> Self {
        Self { backend }
    }

    /// `Ok(None)` when the object does not exist.
    pub async fn get<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        let key = ObjectKey::new(namespace, name);
        match self.backend.get(&api_resource::<K>(), &key).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    /// Every object of kind `K`, across all namespaces when `namespace` is `None`
    pub async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        self.backend
            .list(&api_resource::<K>(), namespace)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    /// Creates `object`; an existing object surfaces as a conflict.
    pub async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let created = self
            .backend
            .create(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(created)
    }

    /// Replaces the object; its `metadata.resourceVersion` is the CAS guard.
    pub async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let updated = self
            .backend
            .update(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(updated)
    }

    /// Writes the status subresource, guarded like [`Store::update`].
    pub async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let updated = self
            .backend
            .update_status(&api_resource::<K>(), &to_dynamic(object)?)
            .await?;
        from_dynamic(updated)
    }

    /// Deletes by name; a missing object is an error
    pub async fn delete<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError> {
        self.backend
            .delete(&api_resource::<K>(), &ObjectKey::new(namespace, name))
            .await
    }

    /// Delete that treats an already absent object as success.
    /// Returns whether a delete call actually removed something.
    pub async fn delete_if_present<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, StoreError> {
        match self.delete::<K>(namespace, name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Erased API resource description of a static kind.
pub fn api_resource<K: StoreObject>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub(crate) fn to_dynamic<K: StoreObject>(object: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

pub(crate) fn from_dynamic<K: StoreObject>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}
