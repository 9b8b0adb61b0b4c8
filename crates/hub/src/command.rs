//! Request/reply procedure over the Hub.
//!
//! Every command-issuing caller follows the same steps: subscribe to the
//! fresh command id, enqueue the command, then wait on whichever fires
//! first of {reply, timeout, cancellation}. The subscription guard releases
//! the correlation slot on every exit path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flotilla_common::{Envelope, FleetError, Result};

use crate::hub::Hub;

/// A Hub caller with a fixed per-command deadline. Cheap to clone; each
/// engine keeps its own with its configured timeout.
#[derive(Clone)]
pub struct CommandClient {
    hub: Arc<Hub>,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(hub: Arc<Hub>, timeout: Duration) -> Self {
        Self { hub, timeout }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Invoke `action` on an agent and return the raw response envelope.
    pub async fn invoke(
        &self,
        agent_id: Uuid,
        action: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<Envelope> {
        self.invoke_with_timeout(agent_id, action, payload, self.timeout, cancel)
            .await
    }

    pub async fn invoke_with_timeout(
        &self,
        agent_id: Uuid,
        action: &str,
        payload: Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Envelope> {
        let command = Envelope::command(action, payload);
        // Subscribe before sending so a reply cannot race the registration.
        let mut subscription = self.hub.subscribe_response(command.id);
        self.hub.send_command(agent_id, command)?;

        tokio::select! {
            reply = subscription.recv() => {
                // A closed channel means the slot was revoked externally;
                // the caller observes it as a cancellation.
                reply.ok_or(FleetError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => Err(FleetError::CommandTimeout {
                action: action.to_string(),
                timeout,
            }),
            _ = cancel.cancelled() => Err(FleetError::Cancelled),
        }
    }

    /// Invoke and decode the reply data into an action schema. An error
    /// envelope surfaces as `AgentActionFailed`.
    pub async fn invoke_parsed<T: serde::de::DeserializeOwned>(
        &self,
        agent_id: Uuid,
        action: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.invoke(agent_id, action, payload, cancel)
            .await?
            .parse_data()
    }

    /// Resolve the session for a host and invoke on it.
    pub async fn invoke_on_host<T: serde::de::DeserializeOwned>(
        &self,
        host_id: Uuid,
        action: &str,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let connection = self
            .hub
            .get_agent_by_host(host_id)
            .ok_or_else(|| FleetError::AgentUnavailable(host_id.to_string()))?;
        self.invoke_parsed(connection.agent_id, action, payload, cancel)
            .await
    }
}
