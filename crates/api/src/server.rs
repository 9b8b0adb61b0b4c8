use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use flotilla_common::{FleetConfig, FleetError};
use flotilla_control::{DashboardScanner, TaskManager, TopologyManager};
use flotilla_hub::Hub;
use flotilla_storage::FleetStore;

use crate::routes;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub store: Arc<dyn FleetStore>,
    pub tasks: Arc<TaskManager>,
    pub topology: Arc<TopologyManager>,
    pub scanner: Arc<DashboardScanner>,
    pub config: Arc<FleetConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/agents", get(routes::agents::list_agents))
        .route("/api/summary", get(routes::summary::get_summary))
        .route("/api/summary/refresh", post(routes::summary::refresh_summary))
        .route(
            "/api/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/api/tasks/:id",
            axum::routing::patch(routes::tasks::update_task).delete(routes::tasks::delete_task),
        )
        .route("/api/tasks/:id/status", put(routes::tasks::update_task_status))
        .route(
            "/api/hosts/:id/topology",
            get(routes::topology::get_host_topology),
        )
        .route(
            "/api/hosts/:id/topology/refresh",
            post(routes::topology::refresh_host_topology),
        )
        .route("/ws/agent", get(ws::agent_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps the core error taxonomy onto HTTP statuses.
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
            FleetError::AgentUnavailable(_) | FleetError::AgentBackpressure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FleetError::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flotilla_common::{ScannerConfig, TaskStatus, TopologyConfig};
    use flotilla_storage::{MemoryMetrics, MemoryStore, MetricsProvider};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store: Arc<dyn FleetStore> = Arc::new(MemoryStore::new());
        let metrics: Arc<dyn MetricsProvider> = Arc::new(MemoryMetrics::new());
        let sink = Arc::new(crate::sink::StoreEventSink::new(
            store.clone(),
            metrics.clone(),
        ));
        let hub = Arc::new(Hub::new(sink));
        let tasks = Arc::new(TaskManager::new(store.clone()));
        let topology = Arc::new(TopologyManager::new(
            hub.clone(),
            store.clone(),
            TopologyConfig::default(),
        ));
        let scanner = Arc::new(DashboardScanner::new(
            hub.clone(),
            store.clone(),
            tasks.clone(),
            metrics,
            ScannerConfig::default(),
        ));
        AppState {
            hub,
            store,
            tasks,
            topology,
            scanner,
            config: Arc::new(FleetConfig::default()),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn summary_endpoint_returns_a_snapshot() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/api/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["hosts_total"], 0);
    }

    #[tokio::test]
    async fn task_create_and_list_round_trip() {
        let app = build_router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"title": "Rotate certs", "severity": "warning"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "open");

        let response = app
            .oneshot(
                Request::get("/api/tasks?severity=warning")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["tasks"][0]["title"], "Rotate certs");
    }

    #[tokio::test]
    async fn validation_and_not_found_map_to_http_statuses() {
        let app = build_router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"title": "  "}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::put(format!("/api/tasks/{}/status", uuid::Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"status": "resolved"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_transition_over_http_stamps_audit_fields() {
        let state = test_state();
        let app = build_router(state.clone());
        let task = state
            .tasks
            .create_manual_task(flotilla_common::NewManualTask {
                title: "Check backups".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::put(format!("/api/tasks/{}/status", task.id))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"status": "acknowledged", "actor": "op1"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let updated = state.tasks.get_task(task.id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Acknowledged);
        assert_eq!(updated.acknowledged_by.as_deref(), Some("op1"));
    }

    #[tokio::test]
    async fn topology_read_reports_staleness() {
        let state = test_state();
        let app = build_router(state.clone());
        let host_id = uuid::Uuid::new_v4();
        state
            .store
            .upsert_network_topology(&flotilla_common::NetworkTopologyRecord {
                host_id,
                network_id: "n1".into(),
                snapshot: json!({"driver": "bridge"}),
                refreshed_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/api/hosts/{host_id}/topology"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["networks"]["n1"]["stale"], false);
        assert_eq!(body["networks"]["n1"]["snapshot"]["driver"], "bridge");
    }
}
