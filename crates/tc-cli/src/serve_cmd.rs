//! The HTTP dashboard. Embedded in the `start` process, sharing the same
//! pool the dispatch loop uses -- read endpoints hit the database directly,
//! write endpoints (pause/resume/priority) mutate it and fan the change out
//! over an SSE stream so a browser tab stays current without polling.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use tc_db::models::ProjectStatus;
use tc_db::queries::tasks::TaskProgress;
use tc_db::queries::{projects as project_db, spend_events, tasks as task_db};

// ---------------------------------------------------------------------------
// Dashboard events (SSE)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DashboardEvent {
    #[serde(rename = "taskUpdated")]
    TaskUpdated { task_id: Uuid },
    #[serde(rename = "projectPaused")]
    ProjectPaused { project_id: Uuid },
    #[serde(rename = "projectResumed")]
    ProjectResumed { project_id: Uuid },
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub events: broadcast::Sender<DashboardEvent>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("{err:#}") }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProjectSummaryResponse {
    #[serde(flatten)]
    pub project: tc_db::models::Project,
    pub progress: TaskProgress,
}

#[derive(Debug, Deserialize)]
pub struct SetPriorityRequest {
    pub priority: i32,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    let (events, _) = broadcast::channel(256);
    let state = AppState { pool, events };

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/projects", get(list_projects_handler))
        .route("/api/projects/{id}", get(get_project_detail))
        .route("/api/agents", get(list_agents))
        .route("/api/tasks", get(list_tasks_handler))
        .route("/api/metrics", get(get_metrics))
        .route("/api/recommendations", get(get_recommendations))
        .route("/api/tasks/{id}/priority", post(set_task_priority_handler))
        .route("/api/projects/{id}/pause", post(pause_project_handler))
        .route("/api/projects/{id}/resume", post(resume_project_handler))
        .route("/api/events", get(sse_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: String, port: u16, shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("trafficcontrol dashboard listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown(shutdown)).await?;
    tracing::info!("trafficcontrol dashboard shut down");
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_status(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&state.pool).await.map_err(AppError::internal)?;

    let mut totals = TaskProgress::default();
    for project in &projects {
        let progress = task_db::get_project_progress(&state.pool, project.id).await.map_err(AppError::internal)?;
        totals.queued += progress.queued;
        totals.in_progress += progress.in_progress;
        totals.blocked += progress.blocked;
        totals.complete += progress.complete;
        totals.cancelled += progress.cancelled;
    }

    Ok(Json(serde_json::json!({
        "project_count": projects.len(),
        "totals": totals,
    }))
    .into_response())
}

async fn list_projects_handler(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&state.pool).await.map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(projects.len());
    for project in projects {
        let progress = task_db::get_project_progress(&state.pool, project.id).await.map_err(AppError::internal)?;
        results.push(ProjectSummaryResponse { project, progress });
    }

    Ok(Json(results).into_response())
}

async fn get_project_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let project = project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let progress = task_db::get_project_progress(&state.pool, id).await.map_err(AppError::internal)?;
    let tasks = task_db::list_tasks_for_project(&state.pool, id).await.map_err(AppError::internal)?;

    Ok(Json(serde_json::json!({
        "project": project,
        "progress": progress,
        "tasks": tasks,
    }))
    .into_response())
}

/// Per-model capacity limits, as configured -- see the doc comment on
/// `agent_cmd::list` for why this cannot report true live session counts.
async fn list_agents(State(_state): State<AppState>) -> Result<axum::response::Response, AppError> {
    Ok(Json(serde_json::json!({
        "models": tc_db::models::SessionModel::ALL,
        "note": "live per-model session counts are held in the running orchestrator's memory, not in the database",
    }))
    .into_response())
}

async fn list_tasks_handler(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let tasks = task_db::get_ready_tasks(&state.pool).await.map_err(AppError::internal)?;
    Ok(Json(tasks).into_response())
}

async fn get_metrics(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let since = chrono::Utc::now() - chrono::Duration::hours(24);
    let spend = spend_events::sum_spend_since(&state.pool, since).await.map_err(AppError::internal)?;
    Ok(Json(serde_json::json!({ "spend_last_24h_usd": spend })).into_response())
}

async fn get_recommendations(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let data = crate::proposal_cmd::list(&state.pool).await.map_err(AppError::internal)?;
    Ok(Json(data.data).into_response())
}

async fn set_task_priority_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<SetPriorityRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<axum::response::Response, AppError> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.to_string()))?;

    let task = task_db::get_task(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    task_db::set_task_priority(&state.pool, task.id, req.priority).await.map_err(AppError::internal)?;
    let _ = state.events.send(DashboardEvent::TaskUpdated { task_id: task.id });

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn pause_project_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    project_db::set_project_status(&state.pool, id, ProjectStatus::Paused).await.map_err(AppError::internal)?;
    let _ = state.events.send(DashboardEvent::ProjectPaused { project_id: id });

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn resume_project_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    project_db::set_project_status(&state.pool, id, ProjectStatus::Active).await.map_err(AppError::internal)?;
    let _ = state.events.send(DashboardEvent::ProjectResumed { project_id: id });

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => serde_json::to_string(&event).ok().map(|json| Ok(Event::default().data(json))),
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
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

    use tc_db::queries::projects::insert_project;
    use tc_test_utils::{create_test_db, drop_test_db};

    async fn send_request(pool: PgPool, method: &str, uri: &str, body: Body) -> axum::response::Response {
        let app = super::build_router(pool);
        app.oneshot(Request::builder().method(method).uri(uri).body(body).unwrap()).await.unwrap()
    }

    async fn send_json_request(pool: PgPool, method: &str, uri: &str, body: Body) -> axum::response::Response {
        let app = super::build_router(pool);
        app.oneshot(
            Request::builder().method(method).uri(uri).header("content-type", "application/json").body(body).unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_with_no_projects() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/api/status", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["project_count"], 0);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_list_projects_with_data() {
        let (pool, db_name) = create_test_db().await;

        let project = insert_project(&pool, "dashboard-project", 5, "/tmp/project").await.unwrap();

        let resp = send_request(pool.clone(), "GET", "/api/projects", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["name"], project.name);
        assert!(arr[0].get("progress").is_some());

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_project_not_found() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_request(pool.clone(), "GET", &format!("/api/projects/{random_id}"), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_pause_then_resume_project() {
        let (pool, db_name) = create_test_db().await;

        let project = insert_project(&pool, "pausable", 5, "/tmp/project").await.unwrap();

        let resp = send_request(pool.clone(), "POST", &format!("/api/projects/{}/pause", project.id), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send_request(pool.clone(), "POST", &format!("/api/projects/{}/resume", project.id), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_pause_unknown_project_is_404() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_request(pool.clone(), "POST", &format!("/api/projects/{random_id}/pause"), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_set_task_priority_with_malformed_body_is_400() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_json_request(
            pool.clone(),
            "POST",
            &format!("/api/tasks/{random_id}/priority"),
            Body::from("not json"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
