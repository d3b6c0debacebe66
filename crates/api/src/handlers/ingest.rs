//! Activity ingest endpoint
//!
//! One activity per call from the endpoint agents. The handler stays thin:
//! all pipeline semantics (validation, persistence, detection, fingerprint
//! gating, escalation) live in `sentinel_detection::IngestPipeline`.

use axum::{
    extract::State,
    response::Json,
    routing::{post, Router},
};
use chrono::Utc;
use sentinel_detection::{IngestRequest, IngestResponse};
use tracing::debug;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/activity", post(ingest_activity))
}

/// Ingest one activity: persist, score, and escalate as needed.
async fn ingest_activity(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    debug!(user_id = %request.user_id, activity_type = %request.activity_type, "Activity received");
    let outcome = state.pipeline.ingest(&request, Utc::now()).await?;
    Ok(Json(outcome.response))
}
