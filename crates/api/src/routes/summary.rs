use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;

use flotilla_common::Summary;

use crate::server::{ApiResult, AppState};

/// Read-through summary: computed from the store until the scanner's first
/// publish, cached afterwards.
pub async fn get_summary(State(state): State<AppState>) -> ApiResult<Json<Summary>> {
    Ok(Json(state.tasks.refresh_summary().await?))
}

/// Force a scan tick now instead of waiting for the next interval.
pub async fn refresh_summary(State(state): State<AppState>) -> ApiResult<Json<Summary>> {
    let summary = state.scanner.scan_once(&CancellationToken::new()).await?;
    Ok(Json(summary))
}
