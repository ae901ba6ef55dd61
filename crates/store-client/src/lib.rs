//! Object Store Client
//!
//! Typed access to a declarative object store (the Kubernetes API server in
//! production) with get/list/create/update/delete and optimistic concurrency
//! through resource versions.
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use store_client::{KubeObjectStore, Store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = Store::new(KubeObjectStore::new(client));
//!
//! if let Some(cm) = store.get::<ConfigMap>(Some("cluster-abc"), "cloud-config").await? {
//!     println!("resourceVersion {:?}", cm.metadata.resource_version);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The backend is the object-safe [`ObjectStoreTrait`] working on
//! `DynamicObject`s; [`Store`] layers typed conversion on top so callers
//! never touch JSON. With the `test-util` feature, [`MockObjectStore`]
//! provides an in-memory backend for unit tests.

pub mod client;
pub mod error;
pub mod merge;
pub mod store;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeObjectStore;
pub use error::StoreError;
pub use store::{Store, StoreObject};
pub use store_trait::{ObjectKey, ObjectStoreTrait};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockObjectStore, Operation, WriteCounters};
