//! WebSocket endpoint for agent connections.
//!
//! Endpoint: GET /ws/agent?host_id=<uuid>&name=<hostname>
//!
//! Flow:
//! 1. Agent connects and is registered with the Hub (last-writer-wins per
//!    host).
//! 2. A writer task drains the session's bounded outbound queue onto the
//!    socket; the reader loop feeds decoded frames into the Hub.
//! 3. On close the session is unregistered and the host row goes offline.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use flotilla_common::{Envelope, Host, HOST_STATUS_OFFLINE, HOST_STATUS_ONLINE};
use flotilla_hub::AgentConnection;
use flotilla_storage::FleetStore;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub host_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn agent_ws(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, query, socket))
}

async fn handle_socket(state: AppState, query: AgentQuery, socket: WebSocket) {
    let host_id = query.host_id;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (connection, mut outbound) = AgentConnection::new(host_id);
    let agent_id = state.hub.register_agent(connection);
    info!(%agent_id, %host_id, "agent connected");

    // Host row bookkeeping: create the row on first contact, refresh it on
    // reconnect.
    let name = match state.store.get_host(host_id).await {
        Ok(Some(existing)) => query.name.unwrap_or(existing.name),
        _ => query.name.unwrap_or_else(|| host_id.to_string()),
    };
    if let Err(err) = state
        .store
        .upsert_host(&Host {
            id: host_id,
            name,
            status: HOST_STATUS_ONLINE.to_string(),
            last_seen: Some(Utc::now()),
        })
        .await
    {
        warn!(%host_id, "host registration bookkeeping failed: {err}");
    }

    // Writer task: the outbound queue is the only path onto the socket. A
    // write error terminates the session; waiting callers run into their
    // own deadlines.
    let writer_hub = state.hub.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%agent_id, "unencodable outbound frame: {err}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                writer_hub.unregister_agent(agent_id);
                break;
            }
        }
    });

    // Reader loop: decode errors drop the frame but keep the session.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => state.hub.handle_inbound(agent_id, host_id, envelope).await,
                Err(err) => warn!(%agent_id, "undecodable frame dropped: {err}"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.hub.unregister_agent(agent_id);
    writer.abort();

    // Keep last_seen as the last heartbeat; the scanner picks the offline
    // signal up from here on its next tick.
    if let Err(err) = state.store.set_host_status(host_id, HOST_STATUS_OFFLINE).await {
        warn!(%host_id, "disconnect bookkeeping failed: {err}");
    }
    info!(%agent_id, %host_id, "agent disconnected");
}
