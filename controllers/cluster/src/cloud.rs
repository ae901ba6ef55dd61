//! Cloud provider integration
//!
//! A provider prepares the infrastructure a control plane depends on
//! (networks, security groups, ...) and tears it down on deletion. Providers
//! are looked up by `spec.cloud.provider`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crds::ManagedCluster;

use crate::error::ControllerError;

/// Name of the provider that needs no infrastructure
pub const BRING_YOUR_OWN: &str = "bringyourown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureState {
    Provisioning,
    Ready,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Whether `cleanup` has to run before the cluster may go away
    fn needs_cleanup(&self) -> bool;

    /// Idempotent; called on every pass until it reports `Ready`
    async fn initialize(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<InfrastructureState, ControllerError>;

    /// Idempotent teardown
    async fn cleanup(&self, cluster: &ManagedCluster) -> Result<(), ControllerError>;
}

/// Infrastructure is supplied by the user; nothing to prepare
#[derive(Debug, Clone, Copy, Default)]
pub struct BringYourOwn;

#[async_trait]
impl CloudProvider for BringYourOwn {
    fn needs_cleanup(&self) -> bool {
        false
    }

    async fn initialize(
        &self,
        _cluster: &ManagedCluster,
    ) -> Result<InfrastructureState, ControllerError> {
        Ok(InfrastructureState::Ready)
    }

    async fn cleanup(&self, _cluster: &ManagedCluster) -> Result<(), ControllerError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct CloudProviderRegistry {
    providers: HashMap<String, Arc<dyn CloudProvider>>,
}

impl std::fmt::Debug for CloudProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("CloudProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl Default for CloudProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(BRING_YOUR_OWN, Arc::new(BringYourOwn));
        registry
    }
}

impl CloudProviderRegistry {
    pub fn register(&mut self, name: &str, provider: Arc<dyn CloudProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    /// Provider for `cluster`; an empty provider name means bring-your-own.
    pub fn for_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<Arc<dyn CloudProvider>, ControllerError> {
        let name = match cluster.spec.cloud.provider.as_str() {
            "" => BRING_YOUR_OWN,
            name => name,
        };
        self.providers.get(name).cloned().ok_or_else(|| {
            ControllerError::InvalidConfig(format!("unknown cloud provider {name:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_cluster;

    #[test]
    fn test_empty_provider_is_bring_your_own() {
        let registry = CloudProviderRegistry::default();
        let provider = registry.for_cluster(&test_cluster("abc")).unwrap();
        assert!(!provider.needs_cleanup());
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let registry = CloudProviderRegistry::default();
        let mut cluster = test_cluster("abc");
        cluster.spec.cloud.provider = "openstack".to_string();
        let err = registry.for_cluster(&cluster).err().unwrap();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
