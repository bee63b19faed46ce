//! Liveness and circuit-breaker admin routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use taskforge_core::CircuitBreakerStatus;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CircuitsResponse {
    pub circuits: Vec<CircuitBreakerStatus>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/circuits", get(list_circuits))
        .route("/health/circuits/:name/reset", post(reset_circuit))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process liveness", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

#[utoipa::path(
    get,
    path = "/health/circuits",
    responses((status = 200, description = "Status of every registered circuit breaker", body = CircuitsResponse)),
    tag = "health"
)]
pub async fn list_circuits(State(state): State<AppState>) -> Json<CircuitsResponse> {
    Json(CircuitsResponse {
        circuits: state.breakers.all_status(),
    })
}

#[utoipa::path(
    post,
    path = "/health/circuits/{name}/reset",
    params(("name" = String, Path, description = "Circuit breaker name")),
    responses(
        (status = 200, description = "Circuit reset to closed"),
        (status = 404, description = "No breaker with that name has ever been created")
    ),
    tag = "health"
)]
pub async fn reset_circuit(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.breakers.reset(&name) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
