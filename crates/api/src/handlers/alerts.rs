//! Anomaly alert handlers: listing, mark-viewed, status updates and the
//! manual alert-to-incident conversion.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put, Router},
};
use sentinel_detection::{AlertStatus, Repository};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct MarkViewedRequest {
    pub alert_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/mark-viewed", post(mark_viewed))
        .route("/:id/status", put(update_status))
        .route("/:id/convert-to-incident", post(convert_to_incident))
}

/// List alerts, optionally filtered by status.
async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let alerts = state
        .repository
        .list_alerts(query.status.as_deref(), query.limit.clamp(1, 500))
        .await?;
    Ok(Json(json!({ "alerts": alerts })))
}

/// Mark alerts viewed. Idempotent: repeating the call is a no-op and the
/// count of newly-marked rows reflects that.
async fn mark_viewed(
    State(state): State<AppState>,
    Json(request): Json<MarkViewedRequest>,
) -> ApiResult<Json<Value>> {
    let marked = state.repository.mark_alerts_viewed(&request.alert_ids).await?;
    Ok(Json(json!({ "marked": marked })))
}

/// Update an alert's lifecycle status.
async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<Value>> {
    let status = match request.status.as_str() {
        "new" => AlertStatus::New,
        "validated" => AlertStatus::Validated,
        "dismissed" => AlertStatus::Dismissed,
        "escalated" => AlertStatus::Escalated,
        other => {
            return Err(sentinel_core::Error::invalid_input(format!(
                "unknown alert status '{other}'"
            ))
            .into())
        }
    };
    let id = sentinel_detection::parse_record_id(&id)
        .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable alert id '{id}'")))?;
    let alert = state
        .repository
        .get_alert(id)
        .await?
        .ok_or_else(|| sentinel_core::Error::not_found(format!("alert {id} not found")))?;
    state.repository.set_alert_status(alert.id, status).await?;
    Ok(Json(json!({ "alert_id": alert.display_id(), "status": status.as_str() })))
}

/// Manual conversion to an incident. Accepts numeric and prefixed id forms
/// and returns the original incident on re-submission.
async fn convert_to_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let incident = state.escalation.convert_alert_to_incident(&id).await?;
    Ok(Json(json!({
        "incident_id": incident.display_id(),
        "incident": incident,
    })))
}
