//! Kubernetes Events about ManagedClusters.

use async_trait::async_trait;
use crds::ManagedCluster;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

/// Reporting component recorded on every Event
pub const COMPONENT: &str = "clusterkit-cluster-controller";

/// Action recorded on Events raised during a convergence pass
const RECONCILING_ACTION: &str = "Reconciling";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl From<EventType> for KubeEventType {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        }
    }
}

/// Publishes Events about a cluster. Failures are logged, never returned:
/// a lost Event must not fail a convergence pass.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(
        &self,
        cluster: &ManagedCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

/// Builds the events.k8s.io Event published for a cluster
fn cluster_event(event_type: EventType, reason: &str, message: &str) -> Event {
    Event {
        type_: event_type.into(),
        reason: reason.to_string(),
        note: Some(message.to_string()),
        action: RECONCILING_ACTION.to_string(),
        secondary: None,
    }
}

/// Publishes through the kube-runtime recorder, which aggregates repeated
/// Events into a series instead of creating a new object per call.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: COMPONENT.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        cluster: &ManagedCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let event = cluster_event(event_type, reason, message);
        if let Err(e) = self.recorder.publish(&event, &cluster.object_ref(&())).await {
            warn!(
                "Failed to publish {} event for cluster {}: {}",
                reason,
                cluster.name_any(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_event_carries_reason_and_note() {
        let event = cluster_event(EventType::Warning, "ReconcilingError", "boom");
        assert_eq!(event.type_, KubeEventType::Warning);
        assert_eq!(event.reason, "ReconcilingError");
        assert_eq!(event.note.as_deref(), Some("boom"));
        assert_eq!(event.action, RECONCILING_ACTION);
        assert!(event.secondary.is_none());
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(KubeEventType::from(EventType::Normal), KubeEventType::Normal);
        assert_eq!(KubeEventType::from(EventType::Warning), KubeEventType::Warning);
    }
}
