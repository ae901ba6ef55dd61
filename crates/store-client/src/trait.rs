//! ObjectStoreTrait for mocking
//!
//! This trait abstracts the object store so reconcilers can run against the
//! Kubernetes API in production and against an in-memory store in tests.
//! It is object-safe: every call carries the `ApiResource` describing the
//! kind, and objects travel as `DynamicObject`.

use kube::api::{ApiResource, DynamicObject};

use crate::error::StoreError;

/// Identity of an object within one kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// `metadata.name`
    pub name: String,
}

impl ObjectKey {
    /// Key of `name`, namespaced when `namespace` is given
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects
    pub fn display(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Trait for object store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStoreTrait: Send + Sync {
    /// Fetch one object; absence is `Ok(None)`, not an error
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// List objects of a kind, optionally restricted to a namespace
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create an object; fails with `Conflict` when it already exists
    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace an object, guarded by the resource version it carries
    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace the status subresource, guarded by the resource version
    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete an object; fails with `NotFound` when it is already gone
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError>;
}
