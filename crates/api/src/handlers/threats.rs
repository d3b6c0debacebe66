//! Threat handlers: listing, status updates, operator promotion to
//! incident and resolution with notes.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put, Router},
};
use sentinel_core::RiskLevel;
use sentinel_detection::Repository;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::handlers::alerts::ListQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub severity: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThreatStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

pub fn threat_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_threats))
        .route("/:id/status", put(update_status))
        .route("/:id/promote", post(promote_to_incident))
        .route("/:id/resolve", post(resolve))
}

async fn list_threats(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let threats = state
        .repository
        .list_threats(query.status.as_deref(), query.limit.clamp(1, 500))
        .await?;
    Ok(Json(json!({ "threats": threats })))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ThreatStatusRequest>,
) -> ApiResult<Json<Value>> {
    let id = sentinel_detection::parse_record_id(&id)
        .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable threat id '{id}'")))?;
    let threat = state
        .repository
        .update_threat_status(id, &request.status, request.notes.as_deref())
        .await?;
    Ok(Json(json!({ "threat": threat })))
}

/// Operator-invoked promotion with supplied severity.
async fn promote_to_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PromoteRequest>,
) -> ApiResult<Json<Value>> {
    let severity: RiskLevel = request.severity.parse()?;
    let incident = state
        .escalation
        .promote_threat_to_incident(&id, severity, request.notes.as_deref())
        .await?;
    Ok(Json(json!({
        "incident_id": incident.display_id(),
        "incident": incident,
    })))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ThreatStatusRequest>,
) -> ApiResult<Json<Value>> {
    let threat = state
        .escalation
        .resolve_threat(&id, request.notes.as_deref())
        .await?;
    Ok(Json(json!({ "threat": threat })))
}
