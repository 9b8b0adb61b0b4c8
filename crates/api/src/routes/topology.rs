use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::server::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SnapshotView {
    pub snapshot: Value,
    pub refreshed_at: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct HostTopologyResponse {
    pub networks: HashMap<String, SnapshotView>,
    pub volumes: HashMap<String, SnapshotView>,
}

/// Cached topology for a host, with per-snapshot staleness.
pub async fn get_host_topology(
    State(state): State<AppState>,
    Path(host_id): Path<Uuid>,
) -> ApiResult<Json<HostTopologyResponse>> {
    let networks = state
        .topology
        .get_network_topology(host_id)
        .await?
        .into_iter()
        .map(|(id, record)| {
            let stale = state.topology.is_stale(Some(record.refreshed_at));
            (
                id,
                SnapshotView {
                    snapshot: record.snapshot,
                    refreshed_at: record.refreshed_at,
                    stale,
                },
            )
        })
        .collect();
    let volumes = state
        .topology
        .get_volume_topology(host_id)
        .await?
        .into_iter()
        .map(|(name, record)| {
            let stale = state.topology.is_stale(Some(record.refreshed_at));
            (
                name,
                SnapshotView {
                    snapshot: record.snapshot,
                    refreshed_at: record.refreshed_at,
                    stale,
                },
            )
        })
        .collect();
    Ok(Json(HostTopologyResponse { networks, volumes }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub networks_refreshed: usize,
    pub volumes_refreshed: usize,
}

/// One-shot refresh for a single host, bypassing the background interval.
/// Unlike the background loop this surfaces failures to the caller.
pub async fn refresh_host_topology(
    State(state): State<AppState>,
    Path(host_id): Path<Uuid>,
) -> ApiResult<Json<RefreshResponse>> {
    let cancel = CancellationToken::new();
    let networks_refreshed = state.topology.refresh_networks(host_id, &[], &cancel).await?;
    let volumes_refreshed = state.topology.refresh_volumes(host_id, &[], &cancel).await?;
    Ok(Json(RefreshResponse {
        networks_refreshed,
        volumes_refreshed,
    }))
}
