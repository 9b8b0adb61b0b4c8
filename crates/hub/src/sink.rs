use async_trait::async_trait;
use uuid::Uuid;

use flotilla_common::Envelope;

/// Destination for agent push events (heartbeats, metrics). The Hub routes
/// event frames here; persistence of host rows and time-series writes live
/// with the collaborator, not the Hub.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handle one event frame. Implementations log their own failures; a
    /// bad event never takes the session down.
    async fn handle_event(&self, agent_id: Uuid, host_id: Uuid, event: &Envelope);
}

/// Sink that drops everything. Used by tests and as a construction default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn handle_event(&self, _agent_id: Uuid, _host_id: Uuid, _event: &Envelope) {}
}
