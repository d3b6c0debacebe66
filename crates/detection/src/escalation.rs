//! # Escalation State Machine
//!
//! Per-fingerprint lifecycle: none -> alert -> threat -> incident, with a
//! suppression overlay on open alerts and an absorbing already-escalated
//! state once a fingerprint has produced a threat or incident.
//!
//! Promotion triggers are pure functions of the ML score and the aggregate
//! ITS, so the boundary behavior is directly testable; the engine applies
//! them against persistence, including the two-hour incident dedup window.

use crate::model::*;
use crate::repository::{NewIncident, NewThreat, Repository};
use chrono::{DateTime, Duration, Utc};
use sentinel_core::{ActivityKind, Result, RiskLevel};
use std::sync::Arc;
use tracing::{info, warn};

/// Externally tunable escalation thresholds.
#[derive(Debug, Clone, Copy)]
pub struct EscalationThresholds {
    /// Minimum ML score that opens an alert.
    pub alert: f64,
    /// ML score that promotes an alert to a threat.
    pub threat: f64,
    /// ML score that always auto-promotes to an incident.
    pub incident: f64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            alert: 0.30,
            threat: 0.75,
            incident: 0.90,
        }
    }
}

/// What the trigger table says should happen for one scored event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationDecision {
    pub open_alert: bool,
    pub promote_threat: bool,
    pub promote_incident: bool,
    pub risk: RiskLevel,
}

/// Evaluate the promotion triggers for a detection outcome.
pub fn decide(ml_score: f64, its_score: f64, thresholds: &EscalationThresholds) -> EscalationDecision {
    let risk = escalation_risk_level(ml_score, its_score);
    let open_alert = ml_score >= thresholds.alert;
    let promote_threat = open_alert && ml_score >= thresholds.threat;
    let promote_incident = open_alert
        && (risk == RiskLevel::Critical
            || (risk == RiskLevel::High && its_score >= 50.0)
            || (risk == RiskLevel::High && ml_score >= 0.70)
            || its_score >= 65.0
            || ml_score >= thresholds.incident);
    EscalationDecision {
        open_alert,
        promote_threat,
        promote_incident,
        risk,
    }
}

/// Infer the threat category from the triggering event.
pub fn categorize(activity: &Activity) -> ThreatCategory {
    let details = &activity.details;
    if details.file_action() == Some(FileAction::Delete) {
        return ThreatCategory::Sabotage;
    }
    if details.is_external() && details.attachment_size_mb() > 10.0 {
        return ThreatCategory::DataExfiltration;
    }
    if details.file_size_mb() > 50.0 || details.data_sent_mb() > 50.0 {
        return ThreatCategory::DataExfiltration;
    }
    if activity.kind == ActivityKind::Logon
        && (details.geo_anomaly() > 0 || activity.is_off_hours())
    {
        return ThreatCategory::UnauthorizedAccess;
    }
    if details.is_sensitive() {
        return ThreatCategory::PolicyViolation;
    }
    ThreatCategory::SuspiciousActivity
}

/// Incident type for an auto-promotion: deliberate destruction and data
/// theft file as insider attacks.
pub fn incident_type_for(category: ThreatCategory) -> &'static str {
    match category {
        ThreatCategory::Sabotage | ThreatCategory::DataExfiltration => "insider_attack",
        _ => "security_incident",
    }
}

pub struct EscalationEngine {
    repository: Arc<dyn Repository>,
    thresholds: EscalationThresholds,
    incident_dedup: Duration,
}

impl EscalationEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        thresholds: EscalationThresholds,
        incident_dedup_hours: i64,
    ) -> Self {
        Self {
            repository,
            thresholds,
            incident_dedup: Duration::hours(incident_dedup_hours),
        }
    }

    pub fn thresholds(&self) -> &EscalationThresholds {
        &self.thresholds
    }

    /// Promote an alert to a threat. Reuses an open threat for the same
    /// fingerprint instead of stacking duplicates, and moves both the alert
    /// and the fingerprint into the absorbing escalated state.
    pub async fn promote_to_threat(
        &self,
        alert: &AnomalyAlert,
        activity: &Activity,
        ml_score: f64,
        its_score: f64,
    ) -> Result<Threat> {
        if let Some(existing) = self
            .repository
            .open_threat_for_fingerprint(&alert.fingerprint)
            .await?
        {
            return Ok(existing);
        }

        let category = categorize(activity);
        let threat = self
            .repository
            .create_threat(NewThreat {
                alert_id: Some(alert.id),
                user_id: alert.user_id.clone(),
                category,
                ml_score,
                its_score,
                fingerprint: alert.fingerprint.clone(),
            })
            .await?;
        self.repository
            .set_alert_status(alert.id, AlertStatus::Escalated)
            .await?;
        self.repository
            .mark_fingerprint_escalated(&alert.fingerprint)
            .await?;
        info!(
            threat_id = threat.id,
            user_id = %threat.user_id,
            category = %threat.category,
            "Alert promoted to threat"
        );
        Ok(threat)
    }

    /// Auto-promote to an incident. If an open incident for the same user
    /// was created inside the dedup window, it is updated instead of a new
    /// one being created.
    pub async fn auto_promote_incident(
        &self,
        alert: &AnomalyAlert,
        activity: &Activity,
        threat_id: Option<i64>,
        its_score: f64,
        risk: RiskLevel,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let since = now - self.incident_dedup;
        let incident = match self
            .repository
            .recent_open_incident_for_user(&alert.user_id, since)
            .await?
        {
            Some(open) => {
                let merged = self
                    .repository
                    .touch_incident(open.id, its_score, risk, now)
                    .await?;
                info!(incident_id = merged.id, user_id = %merged.user_id, "Incident refreshed within dedup window");
                merged
            }
            None => {
                let category = categorize(activity);
                let created = self
                    .repository
                    .create_incident(NewIncident {
                        threat_id,
                        alert_id: Some(alert.id),
                        user_id: alert.user_id.clone(),
                        incident_type: incident_type_for(category).to_string(),
                        severity: risk,
                        its_score,
                        description: alert.explanation.clone(),
                        evidence: serde_json::json!({
                            "fingerprint": alert.fingerprint,
                            "ml_score": alert.ml_score,
                            "anomalies": alert.anomalies,
                        }),
                    })
                    .await?;
                info!(incident_id = created.id, user_id = %created.user_id, "Incident auto-created");
                created
            }
        };

        self.repository
            .set_alert_status(alert.id, AlertStatus::Escalated)
            .await?;
        self.repository
            .mark_fingerprint_escalated(&alert.fingerprint)
            .await?;
        Ok(incident)
    }

    /// Operator conversion of an alert into an incident. Accepts numeric
    /// and prefixed id forms and is idempotent: re-submitting returns the
    /// original incident.
    pub async fn convert_alert_to_incident(&self, raw_id: &str) -> Result<Incident> {
        let id = parse_record_id(raw_id)
            .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable alert id '{raw_id}'")))?;
        let alert = self
            .repository
            .get_alert(id)
            .await?
            .ok_or_else(|| sentinel_core::Error::not_found(format!("alert {id} not found")))?;

        if let Some(existing) = self.repository.incident_for_alert(alert.id).await? {
            return Ok(existing);
        }

        let severity: RiskLevel = alert.risk_level.parse().unwrap_or(RiskLevel::Medium);
        let incident = self
            .repository
            .create_incident(NewIncident {
                threat_id: None,
                alert_id: Some(alert.id),
                user_id: alert.user_id.clone(),
                incident_type: "manual_escalation".to_string(),
                severity,
                its_score: alert.its_score,
                description: alert.explanation.clone(),
                evidence: serde_json::json!({
                    "fingerprint": alert.fingerprint,
                    "ml_score": alert.ml_score,
                    "converted_from": alert.display_id(),
                }),
            })
            .await?;
        self.repository
            .set_alert_status(alert.id, AlertStatus::Escalated)
            .await?;
        self.repository
            .mark_fingerprint_escalated(&alert.fingerprint)
            .await?;
        Ok(incident)
    }

    /// Operator promotion of a threat to an incident with supplied severity.
    pub async fn promote_threat_to_incident(
        &self,
        raw_id: &str,
        severity: RiskLevel,
        description: Option<&str>,
    ) -> Result<Incident> {
        let id = parse_record_id(raw_id)
            .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable threat id '{raw_id}'")))?;
        let threat = self
            .repository
            .get_threat(id)
            .await?
            .ok_or_else(|| sentinel_core::Error::not_found(format!("threat {id} not found")))?;

        let incident = self
            .repository
            .create_incident(NewIncident {
                threat_id: Some(threat.id),
                alert_id: threat.alert_id,
                user_id: threat.user_id.clone(),
                incident_type: incident_type_for(
                    threat
                        .category
                        .parse_category()
                        .unwrap_or(ThreatCategory::SuspiciousActivity),
                )
                .to_string(),
                severity,
                its_score: threat.its_score,
                description: description.unwrap_or("Promoted from threat investigation").to_string(),
                evidence: serde_json::json!({
                    "fingerprint": threat.fingerprint,
                    "threat": threat.display_id(),
                }),
            })
            .await?;
        self.repository
            .update_threat_status(threat.id, "escalated", description)
            .await?;
        Ok(incident)
    }

    /// Operator close with notes, valid from any tier state.
    pub async fn resolve_threat(&self, raw_id: &str, notes: Option<&str>) -> Result<Threat> {
        let id = parse_record_id(raw_id)
            .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable threat id '{raw_id}'")))?;
        self.repository.update_threat_status(id, "resolved", notes).await
    }

    pub async fn resolve_incident(&self, raw_id: &str) -> Result<Incident> {
        let id = parse_record_id(raw_id)
            .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable incident id '{raw_id}'")))?;
        self.repository.update_incident_status(id, "resolved").await
    }

    pub async fn dismiss_alert(&self, raw_id: &str) -> Result<()> {
        let id = parse_record_id(raw_id)
            .ok_or_else(|| sentinel_core::Error::invalid_input(format!("unparseable alert id '{raw_id}'")))?;
        if self.repository.get_alert(id).await?.is_none() {
            warn!(alert_id = id, "Dismiss requested for unknown alert");
            return Err(sentinel_core::Error::not_found(format!("alert {id} not found")));
        }
        self.repository.set_alert_status(id, AlertStatus::Dismissed).await
    }
}

trait ParseCategory {
    fn parse_category(&self) -> Option<ThreatCategory>;
}

impl ParseCategory for String {
    fn parse_category(&self) -> Option<ThreatCategory> {
        match self.as_str() {
            "data_exfiltration" => Some(ThreatCategory::DataExfiltration),
            "unauthorized_access" => Some(ThreatCategory::UnauthorizedAccess),
            "sabotage" => Some(ThreatCategory::Sabotage),
            "policy_violation" => Some(ThreatCategory::PolicyViolation),
            "suspicious_activity" => Some(ThreatCategory::SuspiciousActivity),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::repository::NewAlert;
    use std::sync::Arc;

    async fn engine_with_alert() -> (Arc<MemoryRepository>, EscalationEngine, crate::model::AnomalyAlert) {
        let repo = Arc::new(MemoryRepository::new().with_user("U002", "Developer"));
        let alert = repo
            .create_alert(NewAlert {
                user_id: "U002".to_string(),
                fingerprint: "fp-abc".to_string(),
                ml_score: 0.62,
                its_score: 34.0,
                risk_level: RiskLevel::Medium,
                explanation: "External email with attachment".to_string(),
                anomalies: vec![],
                suppressed_until: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();
        let engine = EscalationEngine::new(repo.clone(), EscalationThresholds::default(), 2);
        (repo, engine, alert)
    }

    #[tokio::test]
    async fn manual_conversion_is_idempotent() {
        let (repo, engine, alert) = engine_with_alert().await;

        // All accepted id forms resolve to the same alert.
        let first = engine.convert_alert_to_incident(&alert.display_id()).await.unwrap();
        let again = engine.convert_alert_to_incident(&alert.id.to_string()).await.unwrap();
        let padded = engine.convert_alert_to_incident(&format!("{:05}", alert.id)).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, padded.id);
        assert_eq!(repo.incident_count(), 1);

        // The alert moved to the absorbing escalated state.
        let stored = repo.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "escalated");
        let fingerprint = repo.get_fingerprint("fp-abc").await.unwrap();
        // Fingerprint bookkeeping only exists once ingest observed it.
        assert!(fingerprint.is_none() || fingerprint.unwrap().escalated);
    }

    #[tokio::test]
    async fn threat_promotion_reuses_open_threat_per_fingerprint() {
        let (repo, engine, alert) = engine_with_alert().await;
        let activity = crate::model::Activity {
            id: uuid::Uuid::new_v4(),
            user_id: sentinel_core::UserId::from("U002"),
            timestamp: Utc::now(),
            kind: ActivityKind::Email,
            details: crate::model::ActivityDetails::Email(crate::model::EmailDetails {
                external: true,
                attachment_size_mb: 120.0,
                ..Default::default()
            }),
        };

        let first = engine.promote_to_threat(&alert, &activity, 0.80, 40.0).await.unwrap();
        let second = engine.promote_to_threat(&alert, &activity, 0.82, 41.0).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.threat_count(), 1);
        assert_eq!(first.category, "data_exfiltration");
    }

    #[test]
    fn alert_threshold_boundary_is_inclusive() {
        let thresholds = EscalationThresholds::default();
        assert!(!decide(0.299, 0.0, &thresholds).open_alert);
        assert!(decide(0.300, 0.0, &thresholds).open_alert);
    }

    #[test]
    fn threat_threshold_boundary_is_inclusive() {
        let thresholds = EscalationThresholds::default();
        assert!(!decide(0.749, 0.0, &thresholds).promote_threat);
        assert!(decide(0.750, 0.0, &thresholds).promote_threat);
    }

    #[test]
    fn incident_trigger_paths() {
        let thresholds = EscalationThresholds::default();

        // Critical by ML alone.
        let d = decide(0.80, 0.0, &thresholds);
        assert_eq!(d.risk, RiskLevel::Critical);
        assert!(d.promote_incident);

        // High risk with elevated ITS.
        let d = decide(0.60, 50.0, &thresholds);
        assert_eq!(d.risk, RiskLevel::High);
        assert!(d.promote_incident);

        // High risk with strong ML.
        let d = decide(0.70, 0.0, &thresholds);
        assert!(d.promote_incident);

        // ITS alone past 65 (alert must still open).
        let d = decide(0.35, 66.0, &thresholds);
        assert!(d.promote_incident);

        // High risk but neither companion condition.
        let d = decide(0.65, 20.0, &thresholds);
        assert_eq!(d.risk, RiskLevel::High);
        assert!(!d.promote_incident);
    }

    #[test]
    fn category_inference_prefers_destruction() {
        use crate::model::*;
        use chrono::TimeZone;
        use sentinel_core::UserId;
        use uuid::Uuid;

        let delete = Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U007"),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
            kind: ActivityKind::FileAccess,
            details: ActivityDetails::FileAccess(FileAccessDetails {
                sensitive: true,
                action: FileAction::Delete,
                ..Default::default()
            }),
        };
        assert_eq!(categorize(&delete), ThreatCategory::Sabotage);
        assert_eq!(incident_type_for(ThreatCategory::Sabotage), "insider_attack");

        let exfil = Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U002"),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
            kind: ActivityKind::Email,
            details: ActivityDetails::Email(EmailDetails {
                external: true,
                attachment_size_mb: 120.0,
                ..Default::default()
            }),
        };
        assert_eq!(categorize(&exfil), ThreatCategory::DataExfiltration);
    }
}
