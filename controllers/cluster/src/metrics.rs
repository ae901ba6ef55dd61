//! Prometheus metrics and the health/metrics HTTP endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{info, warn};

use crate::error::ControllerError;

/// Controller metrics, registered under the `clusterkit` namespace
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: Histogram,
    admission_rejected: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("clusterkit".to_string()), None)?;

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Convergence passes grouped by result"),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Latency distribution of convergence passes",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let admission_rejected = IntCounter::with_opts(Opts::new(
            "admission_rejected_total",
            "Passes deferred because the fleet-wide update limit was reached",
        ))?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(admission_rejected.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            admission_rejected,
        })
    }

    /// Records one finished pass
    pub fn observe_reconcile(&self, result: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    /// Records a failed pass; its duration is not known to the error policy
    pub fn inc_reconcile_error(&self) {
        self.reconcile_total.with_label_values(&["error"]).inc();
    }

    pub fn inc_admission_rejected(&self) {
        self.admission_rejected.inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health))
        .route("/readyz", get(health))
        .with_state(metrics)
}

/// Serves `/metrics`, `/healthz` and `/readyz` until the task is dropped.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_results() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_reconcile("converged", Duration::from_millis(20));
        metrics.observe_reconcile("error", Duration::from_millis(5));
        metrics.inc_admission_rejected();

        let body = metrics.render().unwrap();
        assert!(body.contains("clusterkit_reconcile_total{result=\"converged\"} 1"));
        assert!(body.contains("clusterkit_reconcile_total{result=\"error\"} 1"));
        assert!(body.contains("clusterkit_admission_rejected_total 1"));
        assert!(body.contains("clusterkit_reconcile_duration_seconds_count 2"));
    }
}
