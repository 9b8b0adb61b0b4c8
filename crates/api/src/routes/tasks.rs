use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flotilla_common::{DashboardTask, NewManualTask, TaskFilter, TaskPatch};

use crate::server::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<DashboardTask>,
    pub total: i64,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<TaskListResponse>> {
    let (tasks, total) = state.tasks.list_tasks(&filter).await?;
    Ok(Json(TaskListResponse { tasks, total }))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<NewManualTask>,
) -> ApiResult<(StatusCode, Json<DashboardTask>)> {
    let task = state.tasks.create_manual_task(input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<DashboardTask>> {
    Ok(Json(state.tasks.update_task(id, patch).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn update_task_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<DashboardTask>> {
    let task = state
        .tasks
        .update_task_status(id, &body.status, body.actor.as_deref())
        .await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.tasks.delete_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
