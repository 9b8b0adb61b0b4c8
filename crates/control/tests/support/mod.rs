//! Shared fixtures: a scripted agent speaking the real envelope protocol
//! through a real Hub.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use flotilla_common::{Envelope, Host};
use flotilla_hub::{AgentConnection, Hub};

/// Per-action reply data a fake agent serves; mutable between ticks.
#[derive(Clone, Default)]
pub struct Script {
    replies: Arc<Mutex<HashMap<String, Value>>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, action: &str, data: Value) {
        self.replies.lock().await.insert(action.to_string(), data);
    }

    async fn data_for(&self, action: &str) -> Value {
        self.replies
            .lock()
            .await
            .get(action)
            .cloned()
            .unwrap_or_else(|| json!({}))
    }
}

/// Register a session for `host_id` and spawn a task answering every
/// command from the script (empty data when unscripted).
pub fn connect_scripted_agent(hub: &Arc<Hub>, host_id: Uuid, script: Script) -> AgentConnection {
    let (connection, mut outbound) = AgentConnection::new(host_id);
    hub.register_agent(connection.clone());

    let hub = Arc::clone(hub);
    let agent = connection.clone();
    tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            let data = script.data_for(&command.action).await;
            let reply = Envelope::response(command.id, command.action, json!({ "data": data }));
            hub.handle_inbound(agent.agent_id, agent.host_id, reply).await;
        }
    });
    connection
}

pub fn host(name: &str, status: &str, last_seen: Option<DateTime<Utc>>) -> Host {
    Host {
        id: Uuid::new_v4(),
        name: name.to_string(),
        status: status.to_string(),
        last_seen,
    }
}
