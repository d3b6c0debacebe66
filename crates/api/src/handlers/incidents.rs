//! Incident handlers: listing, status updates and resolution.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put, Router},
};
use sentinel_detection::Repository;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::handlers::alerts::ListQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IncidentStatusRequest {
    pub status: String,
}

pub fn incident_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_incidents))
        .route("/:id/status", put(update_status))
        .route("/:id/resolve", post(resolve))
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let incidents = state
        .repository
        .list_incidents(query.status.as_deref(), query.limit.clamp(1, 500))
        .await?;
    Ok(Json(json!({ "incidents": incidents })))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<IncidentStatusRequest>,
) -> ApiResult<Json<Value>> {
    let id = sentinel_detection::parse_record_id(&id)
        .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable incident id '{id}'")))?;
    let incident = state
        .repository
        .update_incident_status(id, &request.status)
        .await?;
    Ok(Json(json!({ "incident": incident })))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let incident = state.escalation.resolve_incident(&id).await?;
    Ok(Json(json!({ "incident": incident })))
}
