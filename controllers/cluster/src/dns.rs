//! Hostname resolution used by the address synchronizer.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::ControllerError;

#[async_trait]
pub trait Resolver: Send + Sync {
    /// All addresses `host` resolves to, in resolver order.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ControllerError>;
}

/// Resolver backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ControllerError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ControllerError::Dns(format!("lookup of {host} failed: {e}")))?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}
