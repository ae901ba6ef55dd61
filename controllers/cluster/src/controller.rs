//! Main controller implementation.
//!
//! This module contains the `Controller` struct that runs the ManagedCluster
//! controller next to the metrics endpoint.

use std::sync::Arc;

use kube::Client;
use store_client::{KubeObjectStore, Store};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventRecorder;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::{self, ReconcileContext};

/// Main controller for ManagedCluster convergence.
#[derive(Debug)]
pub struct Controller {
    cluster_controller: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing cluster controller");

        let client = Client::try_default().await?;
        let store = Store::new(KubeObjectStore::new(client.clone()));
        let events = Arc::new(KubeEventRecorder::new(client.clone()));
        let metrics = Arc::new(Metrics::new()?);

        let metrics_server = {
            let metrics = Arc::clone(&metrics);
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        let ctx = Arc::new(ReconcileContext::new(
            Arc::new(Reconciler::new(store, events, config.clone())),
            metrics,
            config.resync_period,
        ));
        let cluster_controller =
            tokio::spawn(async move { watcher::watch_clusters(client, &config, ctx).await });

        Ok(Self {
            cluster_controller,
            metrics_server,
        })
    }

    /// Runs the controller until a task fails or the process is interrupted.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Cluster controller running");

        let result = tokio::select! {
            result = &mut self.cluster_controller => {
                result.map_err(|e| ControllerError::Watch(format!("ManagedCluster controller panicked: {e}")))
                    .and_then(|r| r)
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("metrics server panicked: {e}")))
                    .and_then(|r| r)
            }
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                signal.map_err(ControllerError::from)
            }
        };

        self.cluster_controller.abort();
        self.metrics_server.abort();
        info!("Cluster controller stopped");
        result
    }
}
