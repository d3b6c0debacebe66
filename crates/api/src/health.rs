//! # Health Check Endpoints
//!
//! - **Liveness** (`/health`, also `/api/health` for the agent handshake):
//!   always 200 with basic service info.
//! - **Readiness** (`/ready`): probes the database and returns 503 until it
//!   answers, for orchestrators and deployment validation.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use sentinel_detection::Repository;
use serde_json::json;
use tracing::error;

use crate::state::AppState;

/// Basic health check endpoint for liveness monitoring.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "sentinel-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check that verifies the persistence dependency.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service can handle requests"),
        (status = 503, description = "A dependency is unavailable")
    )
)]
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.repository.count_users().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"status": "ready", "database": "ok"})),
        ),
        Err(e) => {
            error!("Readiness probe failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not_ready", "database": "unavailable"})),
            )
        }
    }
}
