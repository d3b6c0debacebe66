//! Persistence port for the detection domain.
//!
//! A single repository trait owns every table: persistence is the sole
//! writer of tier records and daily snapshots, and the ingest pipeline sees
//! one linearizable surface for fingerprint bookkeeping. The Postgres
//! implementation bootstraps its own schema at startup.

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PostgresRepository;

use crate::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{Result, RiskLevel};

/// Parameters for a new tier-1 alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: String,
    pub fingerprint: String,
    pub ml_score: f64,
    pub its_score: f64,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub anomalies: Vec<String>,
    pub suppressed_until: DateTime<Utc>,
}

/// Parameters for a new tier-2 threat.
#[derive(Debug, Clone)]
pub struct NewThreat {
    pub alert_id: Option<i64>,
    pub user_id: String,
    pub category: ThreatCategory,
    pub ml_score: f64,
    pub its_score: f64,
    pub fingerprint: String,
}

/// Parameters for a new tier-3 incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub threat_id: Option<i64>,
    pub alert_id: Option<i64>,
    pub user_id: String,
    pub incident_type: String,
    pub severity: RiskLevel,
    pub its_score: f64,
    pub description: String,
    pub evidence: serde_json::Value,
}

/// Aggregates summarized by the ITS engine over the trailing window and by
/// the training pipeline per (user, day).
#[derive(Debug, Clone, Default)]
pub struct ActivityWindowSummary {
    pub logon_count: i64,
    pub mean_logon_hour: f64,
    pub geo_anomalies: i64,
    pub file_accesses: i64,
    pub sensitive_file_accesses: i64,
    pub downloaded_mb: f64,
    pub emails_sent: i64,
    pub external_emails: i64,
    pub large_attachments: i64,
    pub suspicious_keywords: i64,
    pub total_activities: i64,
    pub most_recent: Option<DateTime<Utc>>,
}

impl ActivityWindowSummary {
    /// Summarize a slice of already-loaded activities, used for the
    /// most-recent-history fallback when the trailing window is empty.
    pub fn from_activities(activities: &[Activity]) -> Self {
        let mut summary = ActivityWindowSummary::default();
        let mut logon_hours = Vec::new();
        for activity in activities {
            summary.total_activities += 1;
            summary.most_recent = Some(
                summary
                    .most_recent
                    .map(|m| m.max(activity.timestamp))
                    .unwrap_or(activity.timestamp),
            );
            match &activity.details {
                ActivityDetails::Logon(d) => {
                    summary.logon_count += 1;
                    summary.geo_anomalies += d.geo_anomaly as i64;
                    logon_hours.push(activity.local_hour() as f64);
                }
                ActivityDetails::FileAccess(d) => {
                    summary.file_accesses += 1;
                    if d.sensitive {
                        summary.sensitive_file_accesses += 1;
                    }
                    summary.downloaded_mb += d.size_mb;
                }
                ActivityDetails::Email(d) => {
                    summary.emails_sent += 1;
                    if d.external {
                        summary.external_emails += 1;
                    }
                    if d.attachment_size_mb > 10.0 {
                        summary.large_attachments += 1;
                    }
                    summary.suspicious_keywords += d.suspicious_keywords as i64;
                }
                ActivityDetails::Process(_) | ActivityDetails::Network(_) => {}
            }
        }
        summary.mean_logon_hour = if logon_hours.is_empty() {
            9.0
        } else {
            logon_hours.iter().sum::<f64>() / logon_hours.len() as f64
        };
        summary
    }
}

/// Everything the pipeline, read side and trainers need from storage.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- schema ------------------------------------------------------------

    /// Create tables and indexes if they do not exist.
    async fn initialize(&self) -> Result<()>;

    // -- users -------------------------------------------------------------

    async fn get_user(&self, user_id: &str) -> Result<Option<MonitoredUser>>;
    async fn list_users(&self) -> Result<Vec<MonitoredUser>>;
    async fn update_user_score(&self, user_id: &str, its_score: f64, risk: RiskLevel) -> Result<()>;

    // -- activities ----------------------------------------------------------

    async fn insert_activity(&self, activity: &Activity) -> Result<()>;
    /// Trailing context for the detector: events for this user since
    /// `since`, oldest first, capped at `limit` most recent events.
    async fn recent_context(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Activity>>;
    async fn activities_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Activity>>;
    /// Most recent events regardless of age, newest first.
    async fn latest_activities(&self, user_id: &str, limit: i64) -> Result<Vec<Activity>>;
    async fn count_activities_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    // -- fingerprints --------------------------------------------------------

    async fn get_fingerprint(&self, fingerprint: &str) -> Result<Option<FingerprintRecord>>;
    /// Create-or-bump: inserts a fresh record on first observation,
    /// otherwise advances last-seen and the observation count. The returned
    /// record reflects the state after this observation.
    async fn observe_fingerprint(
        &self,
        fingerprint: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FingerprintRecord>;
    async fn set_fingerprint_suppression(
        &self,
        fingerprint: &str,
        until: DateTime<Utc>,
    ) -> Result<()>;
    async fn mark_fingerprint_escalated(&self, fingerprint: &str) -> Result<()>;

    // -- alerts --------------------------------------------------------------

    async fn open_alert_for_fingerprint(&self, fingerprint: &str) -> Result<Option<AnomalyAlert>>;
    async fn create_alert(&self, alert: NewAlert) -> Result<AnomalyAlert>;
    /// Refresh-in-place with real-time-at-ingest timestamps.
    async fn refresh_alert(
        &self,
        id: i64,
        ml_score: f64,
        its_score: f64,
        risk: RiskLevel,
        explanation: &str,
        anomalies: &[String],
        now: DateTime<Utc>,
    ) -> Result<AnomalyAlert>;
    async fn get_alert(&self, id: i64) -> Result<Option<AnomalyAlert>>;
    async fn list_alerts(&self, status: Option<&str>, limit: i64) -> Result<Vec<AnomalyAlert>>;
    async fn set_alert_status(&self, id: i64, status: AlertStatus) -> Result<()>;
    /// Returns the number of alerts newly marked viewed; repeat calls are a
    /// no-op on already-viewed rows.
    async fn mark_alerts_viewed(&self, ids: &[i64]) -> Result<u64>;
    async fn count_unread_alerts(&self) -> Result<i64>;
    async fn count_alerts_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    // -- threats -------------------------------------------------------------

    async fn create_threat(&self, threat: NewThreat) -> Result<Threat>;
    async fn get_threat(&self, id: i64) -> Result<Option<Threat>>;
    async fn list_threats(&self, status: Option<&str>, limit: i64) -> Result<Vec<Threat>>;
    async fn update_threat_status(&self, id: i64, status: &str, notes: Option<&str>) -> Result<Threat>;
    async fn open_threat_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Threat>>;

    // -- incidents -----------------------------------------------------------

    async fn create_incident(&self, incident: NewIncident) -> Result<Incident>;
    async fn get_incident(&self, id: i64) -> Result<Option<Incident>>;
    async fn list_incidents(&self, status: Option<&str>, limit: i64) -> Result<Vec<Incident>>;
    async fn update_incident_status(&self, id: i64, status: &str) -> Result<Incident>;
    /// Most recent open incident for this user created after `since`, used
    /// by the 2-hour incident dedup window.
    async fn recent_open_incident_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>>;
    /// Merge a repeat auto-promotion into an existing open incident.
    async fn touch_incident(
        &self,
        id: i64,
        its_score: f64,
        severity: RiskLevel,
        now: DateTime<Utc>,
    ) -> Result<Incident>;
    async fn incident_for_alert(&self, alert_id: i64) -> Result<Option<Incident>>;

    // -- ITS snapshots -------------------------------------------------------

    /// Idempotent per (user, day): a second upsert on the same day replaces
    /// the scores, never inserts a second row.
    async fn upsert_snapshot(&self, snapshot: &ItsSnapshot) -> Result<()>;
    async fn snapshots_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> Result<Vec<ItsSnapshot>>;

    // -- aggregates ----------------------------------------------------------

    async fn summarize_window(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ActivityWindowSummary>;

    // -- dashboard -----------------------------------------------------------

    async fn count_users(&self) -> Result<i64>;
    async fn count_users_with_its_at_least(&self, threshold: f64) -> Result<i64>;
    async fn average_its(&self) -> Result<f64>;
    async fn users_with_risk_at_least(&self, level: RiskLevel) -> Result<Vec<MonitoredUser>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use chrono::Utc;
    use sentinel_core::RiskLevel;

    #[tokio::test]
    async fn mark_viewed_twice_is_a_no_op() {
        let repo = MemoryRepository::new().with_user("U002", "Developer");
        let alert = repo
            .create_alert(NewAlert {
                user_id: "U002".to_string(),
                fingerprint: "fp-1".to_string(),
                ml_score: 0.5,
                its_score: 20.0,
                risk_level: RiskLevel::Medium,
                explanation: String::new(),
                anomalies: vec![],
                suppressed_until: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(repo.count_unread_alerts().await.unwrap(), 1);
        assert_eq!(repo.mark_alerts_viewed(&[alert.id]).await.unwrap(), 1);
        assert_eq!(repo.mark_alerts_viewed(&[alert.id]).await.unwrap(), 0);
        assert_eq!(repo.count_unread_alerts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_alert_lookup_ignores_closed_alerts() {
        let repo = MemoryRepository::new().with_user("U002", "Developer");
        let alert = repo
            .create_alert(NewAlert {
                user_id: "U002".to_string(),
                fingerprint: "fp-2".to_string(),
                ml_score: 0.5,
                its_score: 20.0,
                risk_level: RiskLevel::Medium,
                explanation: String::new(),
                anomalies: vec![],
                suppressed_until: Utc::now(),
            })
            .await
            .unwrap();

        assert!(repo.open_alert_for_fingerprint("fp-2").await.unwrap().is_some());
        repo.set_alert_status(alert.id, crate::model::AlertStatus::Dismissed)
            .await
            .unwrap();
        assert!(repo.open_alert_for_fingerprint("fp-2").await.unwrap().is_none());
    }
}
