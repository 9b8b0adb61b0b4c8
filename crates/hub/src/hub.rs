use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use flotilla_common::{Envelope, FleetError, MessageType, Result};

use crate::session::AgentConnection;
use crate::sink::{EventSink, NoopSink};

/// Capacity of a per-command response subscription. A single reply never
/// drops as long as this stays >= 1.
const SUBSCRIPTION_CAPACITY: usize = 4;

const UI_BROADCAST_CAPACITY: usize = 256;

#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, AgentConnection>,
    by_host: HashMap<Uuid, Uuid>,
}

/// Registry of live agent sessions plus the request/response correlator.
///
/// The registry is behind one read-mostly lock; the subscription table is a
/// concurrent map so the drop guard can release without blocking. Neither
/// lock is ever held across an await.
pub struct Hub {
    registry: RwLock<Registry>,
    subscriptions: Arc<DashMap<Uuid, mpsc::Sender<Envelope>>>,
    ui_tx: broadcast::Sender<Envelope>,
    event_sink: Arc<dyn EventSink>,
}

impl Hub {
    pub fn new(event_sink: Arc<dyn EventSink>) -> Self {
        let (ui_tx, _) = broadcast::channel(UI_BROADCAST_CAPACITY);
        Self {
            registry: RwLock::new(Registry::default()),
            subscriptions: Arc::new(DashMap::new()),
            ui_tx,
            event_sink,
        }
    }

    /// Hub with no event routing; used by tests.
    pub fn detached() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    // --- Session registry ---

    /// Add a session, keyed by agent id and indexed by host id. Last writer
    /// wins on host identity: a prior session for the same host is removed
    /// first, which closes its outbound queue once in-flight clones drop.
    pub fn register_agent(&self, connection: AgentConnection) -> Uuid {
        let agent_id = connection.agent_id;
        let host_id = connection.host_id;
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if let Some(previous) = registry.by_host.insert(host_id, agent_id) {
            if registry.sessions.remove(&previous).is_some() {
                warn!(%host_id, prior_agent = %previous, "replacing existing session for host");
            }
        }
        registry.sessions.insert(agent_id, connection);
        agent_id
    }

    /// Remove a session and its host index entry. Idempotent; a newer
    /// session registered for the same host is left untouched.
    pub fn unregister_agent(&self, agent_id: Uuid) {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if let Some(connection) = registry.sessions.remove(&agent_id) {
            if registry.by_host.get(&connection.host_id) == Some(&agent_id) {
                registry.by_host.remove(&connection.host_id);
            }
        }
    }

    /// Point-in-time snapshot of all connected sessions.
    pub fn get_agents(&self) -> Vec<AgentConnection> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .sessions
            .values()
            .cloned()
            .collect()
    }

    pub fn get_agent_by_host(&self, host_id: Uuid) -> Option<AgentConnection> {
        let registry = self.registry.read().expect("registry lock poisoned");
        let agent_id = registry.by_host.get(&host_id)?;
        registry.sessions.get(agent_id).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .sessions
            .len()
    }

    /// Host ids with a live session, for the periodic engines.
    pub fn connected_host_ids(&self) -> Vec<Uuid> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .by_host
            .keys()
            .copied()
            .collect()
    }

    // --- Outbound ---

    /// Non-blocking enqueue onto the agent's outbound queue.
    pub fn send_command(&self, agent_id: Uuid, command: Envelope) -> Result<()> {
        let connection = {
            let registry = self.registry.read().expect("registry lock poisoned");
            registry
                .sessions
                .get(&agent_id)
                .cloned()
                .ok_or_else(|| FleetError::AgentUnavailable(agent_id.to_string()))?
        };
        connection.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                FleetError::AgentBackpressure(agent_id.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                FleetError::AgentUnavailable(agent_id.to_string())
            }
        })
    }

    // --- Response correlation ---

    /// Register a subscription for `command_id`. Must be paired with a
    /// release on every exit path; the returned guard unsubscribes on drop.
    /// A duplicate subscription for a live command id is a caller bug; the
    /// stale entry is replaced and the old waiter sees its channel close.
    pub fn subscribe_response(&self, command_id: Uuid) -> ResponseSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        if self.subscriptions.insert(command_id, tx.clone()).is_some() {
            warn!(%command_id, "replaced existing response subscription");
        }
        ResponseSubscription {
            command_id,
            sender: tx,
            receiver: rx,
            table: Arc::clone(&self.subscriptions),
        }
    }

    /// Idempotent removal; dropping the sender closes the waiter's channel.
    pub fn unsubscribe_response(&self, command_id: Uuid) {
        self.subscriptions.remove(&command_id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    // --- Inbound dispatch ---

    /// Dispatch one decoded frame from an agent's reader task.
    pub async fn handle_inbound(&self, agent_id: Uuid, host_id: Uuid, envelope: Envelope) {
        match envelope.kind {
            MessageType::Response => {
                match self.subscriptions.get(&envelope.id) {
                    Some(subscription) => {
                        // Non-blocking: a full buffer means the caller
                        // already got its reply, so dropping is safe.
                        if let Err(err) = subscription.try_send(envelope) {
                            warn!(%agent_id, "response subscription full, dropping frame: {err}");
                        }
                    }
                    None => {
                        // Late reply to an abandoned request.
                        debug!(%agent_id, command_id = %envelope.id, "discarding unmatched response");
                    }
                }
            }
            MessageType::Event => {
                self.event_sink
                    .handle_event(agent_id, host_id, &envelope)
                    .await;
                // Operator dashboards see the raw event stream.
                let _ = self.ui_tx.send(envelope);
            }
            MessageType::Command => {
                warn!(%agent_id, action = %envelope.action, "agents do not issue commands, dropping");
            }
        }
    }

    // --- UI fan-out ---

    pub fn subscribe_ui(&self) -> broadcast::Receiver<Envelope> {
        self.ui_tx.subscribe()
    }

    /// Broadcast a frame to UI subscribers. Send errors mean no subscriber
    /// is listening, which is fine.
    pub fn publish_ui(&self, envelope: Envelope) {
        let _ = self.ui_tx.send(envelope);
    }
}

/// Receiving half of a per-command subscription. Removes its table entry on
/// drop so abandoning a wait (timeout, cancellation, early return) always
/// releases the slot.
pub struct ResponseSubscription {
    command_id: Uuid,
    /// Identity handle: drop only removes the entry this guard registered,
    /// never a replacement registered after it.
    sender: mpsc::Sender<Envelope>,
    receiver: mpsc::Receiver<Envelope>,
    table: Arc<DashMap<Uuid, mpsc::Sender<Envelope>>>,
}

impl ResponseSubscription {
    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    /// Next matching response. `None` means the subscription was revoked
    /// out from under the waiter.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

impl Drop for ResponseSubscription {
    fn drop(&mut self) {
        self.table
            .remove_if(&self.command_id, |_, tx| tx.same_channel(&self.sender));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::protocol::actions;
    use serde_json::json;

    fn connected_hub() -> (Arc<Hub>, AgentConnection, mpsc::Receiver<Envelope>) {
        let hub = Arc::new(Hub::detached());
        let (connection, outbound) = AgentConnection::new(Uuid::new_v4());
        hub.register_agent(connection.clone());
        (hub, connection, outbound)
    }

    #[tokio::test]
    async fn register_indexes_by_host() {
        let (hub, connection, _outbound) = connected_hub();
        assert_eq!(hub.agent_count(), 1);
        let found = hub.get_agent_by_host(connection.host_id).unwrap();
        assert_eq!(found.agent_id, connection.agent_id);
    }

    #[tokio::test]
    async fn reregister_same_host_replaces_session() {
        let (hub, first, _outbound) = connected_hub();
        let (second, _outbound2) = AgentConnection::new(first.host_id);
        hub.register_agent(second.clone());

        assert_eq!(hub.agent_count(), 1);
        let found = hub.get_agent_by_host(first.host_id).unwrap();
        assert_eq!(found.agent_id, second.agent_id);

        // The replaced session is gone entirely.
        let cmd = Envelope::command(actions::LIST_STACKS, json!({}));
        let err = hub.send_command(first.agent_id, cmd).unwrap_err();
        assert!(matches!(err, FleetError::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn unregister_does_not_clobber_newer_session() {
        let (hub, first, _outbound) = connected_hub();
        let (second, _outbound2) = AgentConnection::new(first.host_id);
        hub.register_agent(second.clone());

        // Stale disconnect for the replaced session arrives late.
        hub.unregister_agent(first.agent_id);
        assert!(hub.get_agent_by_host(first.host_id).is_some());
    }

    #[tokio::test]
    async fn send_after_unregister_fails_fast() {
        let (hub, connection, _outbound) = connected_hub();
        hub.unregister_agent(connection.agent_id);
        let cmd = Envelope::command(actions::LIST_STACKS, json!({}));
        let err = hub.send_command(connection.agent_id, cmd).unwrap_err();
        assert!(matches!(err, FleetError::AgentUnavailable(_)));
        assert!(hub.get_agent_by_host(connection.host_id).is_none());
    }

    #[tokio::test]
    async fn full_outbound_queue_reports_backpressure() {
        let hub = Hub::detached();
        let (connection, _outbound) = AgentConnection::with_capacity(Uuid::new_v4(), 1);
        let agent_id = hub.register_agent(connection);

        hub.send_command(agent_id, Envelope::command(actions::LIST_STACKS, json!({})))
            .unwrap();
        let err = hub
            .send_command(agent_id, Envelope::command(actions::LIST_STACKS, json!({})))
            .unwrap_err();
        assert!(matches!(err, FleetError::AgentBackpressure(_)));
    }

    #[tokio::test]
    async fn response_delivered_exactly_once() {
        let (hub, connection, _outbound) = connected_hub();
        let command_id = Uuid::new_v4();
        let mut subscription = hub.subscribe_response(command_id);

        let reply = Envelope::response(command_id, actions::LIST_STACKS, json!({"data": {}}));
        hub.handle_inbound(connection.agent_id, connection.host_id, reply.clone())
            .await;

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.id, command_id);

        // Second injection of the same id after the guard drops is discarded.
        drop(subscription);
        assert_eq!(hub.subscription_count(), 0);
        hub.handle_inbound(connection.agent_id, connection.host_id, reply)
            .await;
    }

    #[tokio::test]
    async fn unknown_response_id_leaves_other_subscribers_alone() {
        let (hub, connection, _outbound) = connected_hub();
        let watched = Uuid::new_v4();
        let mut subscription = hub.subscribe_response(watched);

        let stray = Envelope::response(Uuid::new_v4(), actions::LIST_STACKS, json!({}));
        hub.handle_inbound(connection.agent_id, connection.host_id, stray)
            .await;

        let expected = Envelope::response(watched, actions::LIST_STACKS, json!({}));
        hub.handle_inbound(connection.agent_id, connection.host_id, expected)
            .await;
        assert_eq!(subscription.recv().await.unwrap().id, watched);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = Hub::detached();
        let command_id = Uuid::new_v4();
        let _subscription = hub.subscribe_response(command_id);
        hub.unsubscribe_response(command_id);
        hub.unsubscribe_response(command_id);
        assert_eq!(hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn events_fan_out_to_ui_subscribers() {
        let (hub, connection, _outbound) = connected_hub();
        let mut ui = hub.subscribe_ui();

        let event = Envelope::event(actions::HEARTBEAT, json!({}));
        hub.handle_inbound(connection.agent_id, connection.host_id, event)
            .await;

        let seen = ui.recv().await.unwrap();
        assert_eq!(seen.action, actions::HEARTBEAT);
    }
}
