//! User lookup handlers
//!
//! The agent performs its startup verification handshake against
//! `GET /api/users/:id`: 200 means verified, 404 aborts the agent.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, Router},
};
use sentinel_detection::Repository;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id", get(get_user))
}

/// List all monitored users with their current ITS.
async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let users = state.repository.list_users().await?;
    Ok(Json(json!({ "users": users })))
}

/// Get one user by id.
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = state
        .repository
        .get_user(&id)
        .await?
        .ok_or_else(|| sentinel_core::Error::unknown_user(&id))?;
    Ok(Json(json!({ "user": user })))
}
