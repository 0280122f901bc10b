//! `sluice serve`: the task-control HTTP API.
//!
//! Exposes task CRUD, manual run/cancel, an SSE progress stream, the full
//! per-server diagnostic, a health snapshot, and the retry-queue contents.
//! The background schedulers (health monitor loop, retry queue) run
//! alongside the server and stop with it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use sluice_core::health::HealthMonitor;
use sluice_core::orchestrator::Orchestrator;
use sluice_core::retry_queue::RetryEntry;
use sluice_db::models::{Direction, ExecutionRecord, Task, TaskKind};
use sluice_db::queries::executions;
use sluice_db::queries::tasks::{self, UpsertTask};

use crate::runtime::{Runtime, build_runtime};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State & request/response types
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    orchestrator: Arc<Orchestrator>,
    health: Arc<HealthMonitor>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let Runtime {
            orchestrator,
            health,
        } = build_runtime(&pool);
        Self {
            pool,
            orchestrator,
            health,
        }
    }
}

/// Body of `PUT /api/tasks`.
#[derive(Debug, Deserialize)]
pub struct TaskUpsertRequest {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_kind")]
    pub kind: TaskKind,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub source_server: String,
    pub target_server: String,
    pub query: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub destination_table: String,
    pub ruleset: serde_json::Value,
    #[serde(default)]
    pub post_update_query: Option<String>,
    #[serde(default)]
    pub post_update_mapping: Option<serde_json::Value>,
    #[serde(default)]
    pub clear_before_insert: bool,
    #[serde(default)]
    pub promotion: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_kind() -> TaskKind {
    TaskKind::Both
}

fn default_direction() -> Direction {
    Direction::Default
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub running: bool,
    pub executions: Vec<ExecutionRecord>,
}

#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub task_id: Uuid,
    pub started: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryQueueResponse {
    pub entries: Vec<RetryEntry>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/tasks", get(list_tasks).put(upsert_task))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/tasks/{id}/run", post(run_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/events", get(task_events))
        .route("/api/servers/{name}/diagnose", get(diagnose_server))
        .route("/api/health", get(health_snapshot))
        .route("/api/retry-queue", get(retry_queue_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let state = AppState::new(pool);

    // Background schedulers live and die with the server.
    let shutdown = CancellationToken::new();
    let health_task = tokio::spawn(
        Arc::clone(&state.health).run(shutdown.clone()),
    );
    let queue_task = tokio::spawn(Arc::clone(state.orchestrator.retry_queue()).run(
        Arc::clone(&state.orchestrator),
        state.health.clone(),
        shutdown.clone(),
    ));

    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("sluice serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = health_task.await;
    let _ = queue_task.await;
    tracing::info!("sluice serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let all = tasks::list_tasks(&state.pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if all.is_empty() {
        "<tr><td colspan=\"4\">No tasks found.</td></tr>".to_string()
    } else {
        all.iter()
            .map(|t| {
                format!(
                    "<tr><td><a href=\"/api/tasks/{id}\">{name}</a></td><td>{status}</td><td>{progress}%</td><td>{id}</td></tr>",
                    id = t.id,
                    name = t.name,
                    status = t.status,
                    progress = t.progress,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>sluice</title></head><body>\
<h1>sluice</h1>\
<p><a href=\"/api/tasks\">/api/tasks</a> | <a href=\"/api/health\">/api/health</a> | <a href=\"/api/retry-queue\">/api/retry-queue</a></p>\
<table><tr><th>Task</th><th>Status</th><th>Progress</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_tasks(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let all = tasks::list_tasks(&state.pool)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(all).into_response())
}

async fn upsert_task(
    State(state): State<AppState>,
    Json(req): Json<TaskUpsertRequest>,
) -> Result<axum::response::Response, AppError> {
    // Vet the ruleset before storing: an unexecutable task would only fail
    // later, at PREPARE.
    let ruleset: sluice_db::rules::Ruleset = serde_json::from_value(req.ruleset.clone())
        .map_err(|e| AppError::bad_request(format!("invalid ruleset: {e}")))?;
    if !ruleset.is_executable() {
        return Err(AppError::bad_request(
            "ruleset has no merge keys (required_fields / existence_key)",
        ));
    }

    let task = tasks::upsert_task(
        &state.pool,
        &UpsertTask {
            name: &req.name,
            active: req.active,
            kind: req.kind,
            direction: req.direction,
            source_server: &req.source_server,
            target_server: &req.target_server,
            query: &req.query,
            params: req.params.clone().unwrap_or_else(|| serde_json::json!([])),
            destination_table: &req.destination_table,
            ruleset: req.ruleset.clone(),
            post_update_query: req.post_update_query.as_deref(),
            post_update_mapping: req.post_update_mapping.clone(),
            clear_before_insert: req.clear_before_insert,
            promotion: req.promotion.clone(),
        },
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(task).into_response())
}

async fn get_task_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let history = executions::list_executions_for_task(&state.pool, id, 10)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TaskDetailResponse {
        running: state.orchestrator.tracker().is_running(task.id),
        task,
        executions: history,
    })
    .into_response())
}

async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = tasks::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    if state.orchestrator.tracker().is_running(task.id) {
        return Err(AppError::conflict(format!("task {id} is already running")));
    }

    // Fire and return; progress is observable on the events stream.
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        let _ = orchestrator.run_task(id).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            task_id: id,
            started: true,
        }),
    )
        .into_response())
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let cancelled = state.orchestrator.tracker().cancel(id);
    Ok(Json(CancelResponse {
        task_id: id,
        cancelled,
    })
    .into_response())
}

/// SSE stream of a task's progress. Terminates after the terminal event
/// (100 or -1) has been delivered.
async fn task_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.progress().subscribe(id);
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => Event::default().json_data(&event).ok().map(Ok),
            // A lagged subscriber just skips to the newest events.
            Err(BroadcastStreamRecvError::Lagged(_)) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn diagnose_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let report = state.orchestrator.connections().diagnose(&name).await;
    Ok(Json(report).into_response())
}

async fn health_snapshot(
    State(state): State<AppState>,
) -> Result<axum::response::Response, AppError> {
    let snapshot = state.health.probe_once().await;
    Ok(Json(snapshot).into_response())
}

async fn retry_queue_status(
    State(state): State<AppState>,
) -> Result<axum::response::Response, AppError> {
    let entries = state.orchestrator.retry_queue().snapshot();
    Ok(Json(RetryQueueResponse { entries }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use sluice_test_utils::{create_test_db, drop_test_db};

    use super::AppState;

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn router(pool: PgPool) -> axum::Router {
        super::build_router(AppState::new(pool))
    }

    async fn send_get(pool: PgPool, uri: &str) -> axum::response::Response {
        router(pool)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn send_put_json(
        pool: PgPool,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        router(pool)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample_task_body(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "source_server": "erp",
            "target_server": "backoffice",
            "query": "SELECT id, branch FROM invoices",
            "destination_table": "invoices",
            "ruleset": {
                "fields": {"id": {"type": "number", "required": true}},
                "required_fields": ["id"],
            },
        })
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_index_returns_html() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_get(pool.clone(), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .expect("should have content-type header")
            .to_str()
            .unwrap();
        assert!(
            content_type.contains("text/html"),
            "content-type should contain text/html, got: {content_type}"
        );

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_list_tasks_empty() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_get(pool.clone(), "/api/tasks").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json, serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_upsert_then_list() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_put_json(pool.clone(), "/api/tasks", sample_task_body("invoices")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        assert_eq!(created["name"], "invoices");
        assert_eq!(created["status"], "idle");

        let resp = send_get(pool.clone(), "/api/tasks").await;
        let json = body_json(resp).await;
        let arr = json.as_array().expect("response should be an array");
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["name"], "invoices");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_upsert_rejects_ruleset_without_merge_keys() {
        let (pool, db_name) = create_test_db().await;

        let mut body = sample_task_body("invoices");
        body["ruleset"] = serde_json::json!({});
        let resp = send_put_json(pool.clone(), "/api/tasks", body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(
            json["error"].as_str().unwrap().contains("merge keys"),
            "unexpected error: {json}"
        );

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_task_detail() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_put_json(pool.clone(), "/api/tasks", sample_task_body("detail")).await;
        let created = body_json(resp).await;
        let id = created["id"].as_str().unwrap();

        let resp = send_get(pool.clone(), &format!("/api/tasks/{id}")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["name"], "detail");
        assert_eq!(json["running"], false);
        assert!(
            json.get("executions").is_some(),
            "should have executions field"
        );

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_task_not_found() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_get(pool.clone(), &format!("/api/tasks/{random_id}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_run_unknown_task_is_404() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = router(pool.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/tasks/{random_id}/run"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_cancel_idle_task_reports_false() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = router(pool.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/tasks/{random_id}/cancel"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["cancelled"], false);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_retry_queue_starts_empty() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_get(pool.clone(), "/api/retry-queue").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["entries"], serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_health_snapshot_with_no_servers() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_get(pool.clone(), "/api/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["store_ok"], true);
        assert_eq!(json["degraded"], false);
        assert_eq!(json["servers"], serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
