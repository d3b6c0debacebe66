//! Dashboard statistics read endpoint.

use axum::{
    extract::State,
    response::Json,
    routing::{get, Router},
};
use sentinel_core::RiskLevel;
use sentinel_detection::{DashboardStats, Repository};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

/// Users at or above this ITS count as active threats.
const ACTIVE_THREAT_ITS: f64 = 50.0;
const RECENT_ALERTS: i64 = 10;

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

/// Aggregate platform numbers for the dashboard's header row.
async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let repository = &state.repository;
    let stats = DashboardStats {
        total_users: repository.count_users().await?,
        active_threats: repository.count_users_with_its_at_least(ACTIVE_THREAT_ITS).await?,
        unread_alerts: repository.count_unread_alerts().await?,
        average_its: repository.average_its().await?,
        high_risk_users: repository.users_with_risk_at_least(RiskLevel::High).await?,
        recent_alerts: repository.list_alerts(None, RECENT_ALERTS).await?,
    };
    Ok(Json(json!(stats)))
}
