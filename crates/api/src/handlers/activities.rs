//! Per-user activity timeline and historical ITS reads
//!
//! Timestamp discipline: everything is stored in UTC and converted to the
//! configured display timezone here, rendered without a trailing timezone
//! marker.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, Router},
};
use chrono::{Duration, Utc};
use sentinel_core::utils;
use sentinel_detection::Repository;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    7
}

pub fn activity_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/activities", get(list_activities))
        .route("/:id/historical-its", get(historical_its))
}

/// Activity timeline for one user over the trailing N days.
async fn list_activities(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<Value>> {
    let user = state
        .repository
        .get_user(&id)
        .await?
        .ok_or_else(|| sentinel_core::Error::unknown_user(&id))?;

    let since = Utc::now() - Duration::days(query.days.max(1));
    let activities = state.repository.activities_since(&user.user_id, since).await?;

    let rows: Vec<Value> = activities
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "user_id": a.user_id,
                "activity_type": a.kind.as_str(),
                "timestamp": utils::to_display_string(a.timestamp, state.display_tz),
                "details": a.details,
            })
        })
        .collect();

    Ok(Json(json!({
        "user_id": user.user_id,
        "days": query.days,
        "activities": rows,
    })))
}

/// Historical ITS series for the last N days, computing and persisting any
/// missing daily snapshots on read.
async fn historical_its(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Json<Value>> {
    let user = state
        .repository
        .get_user(&id)
        .await?
        .ok_or_else(|| sentinel_core::Error::unknown_user(&id))?;

    let days = query.days.clamp(1, 365);
    let now = Utc::now();
    let first_day = utils::day_floor(now - Duration::days(days - 1));

    let existing = state.repository.snapshots_for_user(&user.user_id, first_day).await?;
    let mut by_day: std::collections::HashMap<_, _> =
        existing.into_iter().map(|s| (s.date, s)).collect();

    let mut series = Vec::with_capacity(days as usize);
    for offset in 0..days {
        let day = first_day + Duration::days(offset);
        let snapshot = match by_day.remove(&day) {
            Some(found) => found,
            None => state.its.snapshot_for_day(&user.user_id, &user.role, day).await?,
        };
        series.push(json!({
            "date": utils::to_display_string(snapshot.date, state.display_tz),
            "its_score": snapshot.its_score,
            "risk_level": snapshot.risk_level,
            "alert_count": snapshot.alert_count,
            "activity_count": snapshot.activity_count,
        }));
    }

    Ok(Json(json!({
        "user_id": user.user_id,
        "days": days,
        "history": series,
    })))
}
