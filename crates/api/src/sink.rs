use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use flotilla_common::protocol::actions;
use flotilla_common::{Envelope, MetricsPush, MetricsSample, HOST_STATUS_ONLINE};
use flotilla_hub::EventSink;
use flotilla_storage::{FleetStore, MetricsProvider};

/// Routes agent push events into persistence: heartbeats stamp the host
/// row, metrics land in the time-series backend.
pub struct StoreEventSink {
    store: Arc<dyn FleetStore>,
    metrics: Arc<dyn MetricsProvider>,
}

impl StoreEventSink {
    pub fn new(store: Arc<dyn FleetStore>, metrics: Arc<dyn MetricsProvider>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl EventSink for StoreEventSink {
    async fn handle_event(&self, agent_id: Uuid, host_id: Uuid, event: &Envelope) {
        match event.action.as_str() {
            actions::HEARTBEAT => {
                if let Err(err) = self
                    .store
                    .touch_host(host_id, Utc::now(), HOST_STATUS_ONLINE)
                    .await
                {
                    warn!(%host_id, "heartbeat bookkeeping failed: {err}");
                }
            }
            actions::METRICS => {
                let push: MetricsPush = match event.parse_data() {
                    Ok(push) => push,
                    Err(err) => {
                        warn!(%agent_id, "undecodable metrics event: {err}");
                        return;
                    }
                };
                let sample = MetricsSample {
                    timestamp: event.timestamp,
                    cpu_percent: push.cpu_percent,
                    memory_usage: push.memory_usage,
                    memory_total: push.memory_total,
                    disk_usage: push.disk_usage,
                    disk_total: push.disk_total,
                };
                if let Err(err) = self.metrics.record_sample(host_id, &sample).await {
                    warn!(%host_id, "metrics ingest failed: {err}");
                }
                if let Err(err) = self
                    .store
                    .touch_host(host_id, Utc::now(), HOST_STATUS_ONLINE)
                    .await
                {
                    warn!(%host_id, "metrics bookkeeping failed: {err}");
                }
            }
            other => {
                debug!(%agent_id, action = %other, "unhandled agent event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_storage::{MemoryMetrics, MemoryStore};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn heartbeat_marks_the_host_online() {
        let store = Arc::new(MemoryStore::new());
        let host = flotilla_common::Host {
            id: Uuid::new_v4(),
            name: "edge-1".into(),
            status: "offline".into(),
            last_seen: None,
        };
        store.upsert_host(&host).await.unwrap();
        let sink = StoreEventSink::new(store.clone(), Arc::new(MemoryMetrics::new()));

        let event = Envelope::event(actions::HEARTBEAT, json!({}));
        sink.handle_event(Uuid::new_v4(), host.id, &event).await;

        let updated = store.get_host(host.id).await.unwrap().unwrap();
        assert_eq!(updated.status, HOST_STATUS_ONLINE);
        assert!(updated.last_seen.is_some());
    }

    #[tokio::test]
    async fn metrics_event_lands_in_the_backend() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MemoryMetrics::new());
        let sink = StoreEventSink::new(store, metrics.clone());
        let host_id = Uuid::new_v4();

        let event = Envelope::event(
            actions::METRICS,
            json!({"data": {
                "cpu_percent": "12.5",
                "memory_usage": 512,
                "memory_total": 1024,
                "disk_usage": 10,
                "disk_total": 100,
            }}),
        );
        sink.handle_event(Uuid::new_v4(), host_id, &event).await;

        let samples = metrics
            .query_host_metrics(
                host_id,
                event.timestamp - chrono::Duration::minutes(1),
                event.timestamp + chrono::Duration::minutes(1),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].memory_usage, 512);
        assert_eq!(samples[0].cpu_percent, 12.5);
    }
}
