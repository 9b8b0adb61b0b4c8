use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub agent_id: Uuid,
    pub host_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

/// Point-in-time snapshot of connected agent sessions.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    let agents = state
        .hub
        .get_agents()
        .into_iter()
        .map(|a| AgentInfo {
            agent_id: a.agent_id,
            host_id: a.host_id,
            connected_at: a.connected_at,
        })
        .collect();
    Json(agents)
}
