//! Task CRUD and admin-operation HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskforge_core::admin::{self, AdminError};
use taskforge_core::{ContentLogEntry, Task, TaskFilter, TaskStatus, TaskStore};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub user_context: Option<String>,
    pub delayed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListTasksParams {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListTasksResponse {
    pub tasks: Vec<Task>,
    pub total: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub artifact_log: Vec<ContentLogEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevertResponse {
    pub task_id: Uuid,
    pub reverted_counts: std::collections::HashMap<String, u32>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/tasks/:id/retry", post(retry_task))
        .route("/tasks/:id/accept", post(accept_task))
        .route("/tasks/:id/revert", post(revert_task))
        .with_state(state)
}

fn store_error_response(err: taskforge_core::StoreError) -> Response {
    tracing::error!(error = %err, "store error handling task request");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Maps admin-operation preconditions to HTTP status codes at the
/// boundary, rather than leaking [`AdminError`] variants to clients.
fn admin_error_response(err: AdminError) -> Response {
    match err {
        AdminError::TaskNotFound(_) => StatusCode::NOT_FOUND.into_response(),
        AdminError::NotCancellable { .. }
        | AdminError::NotRetryable { .. }
        | AdminError::NotAcceptable { .. }
        | AdminError::AlreadyAccepted { .. } => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        AdminError::Revert(revert_err) => (StatusCode::BAD_REQUEST, revert_err.to_string()).into_response(),
        AdminError::Store(e) => store_error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/tasks",
    params(
        ("status" = Option<TaskStatus>, Query, description = "Filter by status"),
        ("task_type" = Option<String>, Query, description = "Filter by task type"),
        ("limit" = Option<u32>, Query, description = "Max results, 1..=1000 (default 50)"),
        ("offset" = Option<u32>, Query, description = "Pagination offset")
    ),
    responses((status = 200, description = "Task list", body = ListTasksResponse)),
    tag = "tasks"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, Response> {
    let limit = params.limit.clamp(1, 1000);
    let filter = TaskFilter {
        status: params.status,
        task_type: params.task_type,
    };
    let tasks = state
        .store
        .list_tasks(filter.clone(), limit, params.offset)
        .await
        .map_err(store_error_response)?;
    let total = state.store.count_tasks(filter).await.map_err(store_error_response)?;
    Ok(Json(ListTasksResponse { tasks, total }))
}

#[utoipa::path(
    post,
    path = "/tasks",
    request_body = CreateTaskRequest,
    responses((status = 201, description = "Task created", body = Task)),
    tag = "tasks"
)]
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), Response> {
    let task = Task::new(req.task_type, req.payload, req.user_context, req.delayed_until, Utc::now());
    let created = state.store.create_task(task).await.map_err(store_error_response)?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task with artifact log", body = TaskDetailResponse),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskDetailResponse>, Response> {
    let task = state
        .store
        .get_task_by_id(id)
        .await
        .map_err(store_error_response)?
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;
    let artifact_log = state
        .store
        .get_content_log_by_task(id)
        .await
        .map_err(store_error_response)?;
    Ok(Json(TaskDetailResponse { task, artifact_log }))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/cancel",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task cancelled", body = Task),
        (status = 400, description = "Task is not pending or in_progress"),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Task>, Response> {
    let task = admin::cancel_task(state.store.as_ref(), id)
        .await
        .map_err(admin_error_response)?;
    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/retry",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task reset to pending", body = Task),
        (status = 400, description = "Task is not failed"),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn retry_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Task>, Response> {
    let task = admin::retry_task(state.store.as_ref(), id)
        .await
        .map_err(admin_error_response)?;
    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/accept",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task accepted", body = Task),
        (status = 400, description = "Task is not completed, or already accepted"),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn accept_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Task>, Response> {
    let task = admin::accept_task(state.store.as_ref(), &state.clock, id)
        .await
        .map_err(admin_error_response)?;
    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/revert",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Revert tallied", body = RevertResponse),
        (status = 400, description = "Task is not completed, already accepted, or already reverted"),
        (status = 404, description = "Task not found")
    ),
    tag = "tasks"
)]
pub async fn revert_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RevertResponse>, Response> {
    let summary = admin::revert_task(state.store.as_ref(), &state.clock, id)
        .await
        .map_err(admin_error_response)?;
    Ok(Json(RevertResponse {
        task_id: summary.task_id,
        reverted_counts: summary.counts,
    }))
}
