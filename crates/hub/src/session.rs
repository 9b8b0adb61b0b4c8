use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use flotilla_common::Envelope;

/// Default capacity of the per-agent outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// A live agent session. Created when an agent completes the WebSocket
/// upgrade; holds the bounded outbound queue the writer task drains. The
/// queue is the only serialisation point for outbound writes.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub agent_id: Uuid,
    pub host_id: Uuid,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Envelope>,
}

impl AgentConnection {
    /// New session with the default queue capacity. Returns the receiving
    /// half for the writer task.
    pub fn new(host_id: Uuid) -> (Self, mpsc::Receiver<Envelope>) {
        Self::with_capacity(host_id, DEFAULT_OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(host_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                agent_id: Uuid::new_v4(),
                host_id,
                connected_at: Utc::now(),
                sender,
            },
            receiver,
        )
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub(crate) fn try_send(
        &self,
        envelope: Envelope,
    ) -> Result<(), mpsc::error::TrySendError<Envelope>> {
        self.sender.try_send(envelope)
    }
}
