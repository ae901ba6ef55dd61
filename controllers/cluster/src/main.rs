//! Cluster Controller
//!
//! Converges ManagedCluster resources into hosted Kubernetes control planes:
//! - creates the per-cluster namespace and every control-plane object in it
//! - publishes the API server address and component health in status
//! - limits how many clusters converge at the same time
//! - cleans up through finalizers when a cluster is deleted

mod backoff;
mod cloud;
mod config;
mod controller;
mod dns;
mod error;
mod events;
mod metrics;
mod reconciler;
mod resources;
mod user_cluster;
mod watcher;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod pipeline_test;
#[cfg(test)]
mod deletion_test;

use controller::Controller;
use config::ControllerConfig;
use error::ControllerError;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting cluster controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  External URL: {}", config.external_url);
    info!("  Concurrent passes: {}", config.worker_count);
    info!("  Concurrent cluster updates: {}", config.concurrent_cluster_updates);
    info!(
        "  Seed DNS overwrite: {}",
        config.seed_dns_overwrite.as_deref().unwrap_or("none")
    );
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
