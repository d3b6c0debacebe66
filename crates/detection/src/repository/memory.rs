//! In-memory repository used by unit tests. Mirrors the Postgres
//! implementation's observable behavior closely enough to exercise the
//! ingest pipeline and escalation rules without a database.

use super::{ActivityWindowSummary, NewAlert, NewIncident, NewThreat, Repository};
use crate::model::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{Result, RiskLevel};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    users: HashMap<String, MonitoredUser>,
    activities: Vec<Activity>,
    alerts: Vec<AnomalyAlert>,
    threats: Vec<Threat>,
    incidents: Vec<Incident>,
    fingerprints: HashMap<String, FingerprintRecord>,
    snapshots: HashMap<(String, DateTime<Utc>), ItsSnapshot>,
    next_alert_id: i64,
    next_threat_id: i64,
    next_incident_id: i64,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: &str, role: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.users.insert(
                user_id.to_string(),
                MonitoredUser {
                    user_id: user_id.to_string(),
                    name: format!("User {user_id}"),
                    role: role.to_string(),
                    department: "Engineering".to_string(),
                    email: format!("{}@example.com", user_id.to_lowercase()),
                    its_score: 5.0,
                    risk_level: "low".to_string(),
                    created_at: Utc::now(),
                },
            );
        }
        self
    }

    pub fn alert_count(&self) -> usize {
        self.state.lock().unwrap().alerts.len()
    }

    pub fn threat_count(&self) -> usize {
        self.state.lock().unwrap().threats.len()
    }

    pub fn incident_count(&self) -> usize {
        self.state.lock().unwrap().incidents.len()
    }

    pub fn activity_count(&self) -> usize {
        self.state.lock().unwrap().activities.len()
    }

    fn rank(level: &str) -> usize {
        ["low", "medium", "high", "critical"]
            .iter()
            .position(|l| *l == level)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<MonitoredUser>> {
        Ok(self.state.lock().unwrap().users.get(user_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<MonitoredUser>> {
        let mut users: Vec<_> = self.state.lock().unwrap().users.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }

    async fn update_user_score(&self, user_id: &str, its_score: f64, risk: RiskLevel) -> Result<()> {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(user_id) {
            user.its_score = its_score;
            user.risk_level = risk.as_str().to_string();
        }
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<()> {
        self.state.lock().unwrap().activities.push(activity.clone());
        Ok(())
    }

    async fn recent_context(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Activity>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<_> = state
            .activities
            .iter()
            .filter(|a| a.user_id.as_str() == user_id && a.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.timestamp);
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn activities_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Activity>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<_> = state
            .activities
            .iter()
            .filter(|a| a.user_id.as_str() == user_id && a.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.timestamp);
        Ok(matching)
    }

    async fn latest_activities(&self, user_id: &str, limit: i64) -> Result<Vec<Activity>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<_> = state
            .activities
            .iter()
            .filter(|a| a.user_id.as_str() == user_id)
            .cloned()
            .collect();
        matching.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn count_activities_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .activities
            .iter()
            .filter(|a| a.user_id.as_str() == user_id && a.timestamp >= from && a.timestamp < to)
            .count() as i64)
    }

    async fn get_fingerprint(&self, fingerprint: &str) -> Result<Option<FingerprintRecord>> {
        Ok(self.state.lock().unwrap().fingerprints.get(fingerprint).cloned())
    }

    async fn observe_fingerprint(
        &self,
        fingerprint: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FingerprintRecord> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .fingerprints
            .entry(fingerprint.to_string())
            .and_modify(|r| {
                r.last_seen = now;
                r.observation_count += 1;
            })
            .or_insert(FingerprintRecord {
                fingerprint: fingerprint.to_string(),
                user_id: user_id.to_string(),
                first_seen: now,
                last_seen: now,
                observation_count: 1,
                escalated: false,
                suppressed_until: None,
            });
        Ok(record.clone())
    }

    async fn set_fingerprint_suppression(
        &self,
        fingerprint: &str,
        until: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(record) = self.state.lock().unwrap().fingerprints.get_mut(fingerprint) {
            record.suppressed_until = Some(until);
        }
        Ok(())
    }

    async fn mark_fingerprint_escalated(&self, fingerprint: &str) -> Result<()> {
        if let Some(record) = self.state.lock().unwrap().fingerprints.get_mut(fingerprint) {
            record.escalated = true;
        }
        Ok(())
    }

    async fn open_alert_for_fingerprint(&self, fingerprint: &str) -> Result<Option<AnomalyAlert>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .alerts
            .iter()
            .filter(|a| a.fingerprint == fingerprint && matches!(a.status.as_str(), "new" | "validated"))
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<AnomalyAlert> {
        let mut state = self.state.lock().unwrap();
        state.next_alert_id += 1;
        let now = Utc::now();
        let created = AnomalyAlert {
            id: state.next_alert_id,
            user_id: alert.user_id,
            fingerprint: alert.fingerprint,
            ml_score: alert.ml_score,
            its_score: alert.its_score,
            risk_level: alert.risk_level.as_str().to_string(),
            explanation: alert.explanation,
            anomalies: serde_json::to_value(&alert.anomalies)?,
            status: "new".to_string(),
            viewed: false,
            suppressed_until: Some(alert.suppressed_until),
            created_at: now,
            updated_at: now,
        };
        state.alerts.push(created.clone());
        Ok(created)
    }

    async fn refresh_alert(
        &self,
        id: i64,
        ml_score: f64,
        its_score: f64,
        risk: RiskLevel,
        explanation: &str,
        anomalies: &[String],
        now: DateTime<Utc>,
    ) -> Result<AnomalyAlert> {
        let mut state = self.state.lock().unwrap();
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| sentinel_core::Error::not_found("alert not found"))?;
        alert.ml_score = ml_score;
        alert.its_score = its_score;
        alert.risk_level = risk.as_str().to_string();
        alert.explanation = explanation.to_string();
        alert.anomalies = serde_json::to_value(anomalies)?;
        alert.updated_at = now;
        Ok(alert.clone())
    }

    async fn get_alert(&self, id: i64) -> Result<Option<AnomalyAlert>> {
        Ok(self.state.lock().unwrap().alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_alerts(&self, status: Option<&str>, limit: i64) -> Result<Vec<AnomalyAlert>> {
        let state = self.state.lock().unwrap();
        let mut alerts: Vec<_> = state
            .alerts
            .iter()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.updated_at));
        alerts.truncate(limit as usize);
        Ok(alerts)
    }

    async fn set_alert_status(&self, id: i64, status: AlertStatus) -> Result<()> {
        if let Some(alert) = self.state.lock().unwrap().alerts.iter_mut().find(|a| a.id == id) {
            alert.status = status.as_str().to_string();
            alert.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_alerts_viewed(&self, ids: &[i64]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for alert in state.alerts.iter_mut() {
            if ids.contains(&alert.id) && !alert.viewed {
                alert.viewed = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_unread_alerts(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().alerts.iter().filter(|a| !a.viewed).count() as i64)
    }

    async fn count_alerts_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .alerts
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= from && a.created_at < to)
            .count() as i64)
    }

    async fn create_threat(&self, threat: NewThreat) -> Result<Threat> {
        let mut state = self.state.lock().unwrap();
        state.next_threat_id += 1;
        let now = Utc::now();
        let created = Threat {
            id: state.next_threat_id,
            alert_id: threat.alert_id,
            user_id: threat.user_id,
            category: threat.category.as_str().to_string(),
            ml_score: threat.ml_score,
            its_score: threat.its_score,
            fingerprint: threat.fingerprint,
            status: "open".to_string(),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        state.threats.push(created.clone());
        Ok(created)
    }

    async fn get_threat(&self, id: i64) -> Result<Option<Threat>> {
        Ok(self.state.lock().unwrap().threats.iter().find(|t| t.id == id).cloned())
    }

    async fn list_threats(&self, status: Option<&str>, limit: i64) -> Result<Vec<Threat>> {
        let state = self.state.lock().unwrap();
        let mut threats: Vec<_> = state
            .threats
            .iter()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        threats.sort_by_key(|t| std::cmp::Reverse(t.updated_at));
        threats.truncate(limit as usize);
        Ok(threats)
    }

    async fn update_threat_status(&self, id: i64, status: &str, notes: Option<&str>) -> Result<Threat> {
        let mut state = self.state.lock().unwrap();
        let threat = state
            .threats
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| sentinel_core::Error::not_found("threat not found"))?;
        threat.status = status.to_string();
        if let Some(notes) = notes {
            threat.notes = Some(notes.to_string());
        }
        threat.updated_at = Utc::now();
        Ok(threat.clone())
    }

    async fn open_threat_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Threat>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .threats
            .iter()
            .filter(|t| t.fingerprint == fingerprint && t.status == "open")
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn create_incident(&self, incident: NewIncident) -> Result<Incident> {
        let mut state = self.state.lock().unwrap();
        state.next_incident_id += 1;
        let now = Utc::now();
        let created = Incident {
            id: state.next_incident_id,
            threat_id: incident.threat_id,
            alert_id: incident.alert_id,
            user_id: incident.user_id,
            incident_type: incident.incident_type,
            severity: incident.severity.as_str().to_string(),
            its_score: incident.its_score,
            description: incident.description,
            evidence: incident.evidence,
            status: "open".to_string(),
            created_at: now,
            updated_at: now,
        };
        state.incidents.push(created.clone());
        Ok(created)
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        Ok(self.state.lock().unwrap().incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn list_incidents(&self, status: Option<&str>, limit: i64) -> Result<Vec<Incident>> {
        let state = self.state.lock().unwrap();
        let mut incidents: Vec<_> = state
            .incidents
            .iter()
            .filter(|i| status.map(|s| i.status == s).unwrap_or(true))
            .cloned()
            .collect();
        incidents.sort_by_key(|i| std::cmp::Reverse(i.updated_at));
        incidents.truncate(limit as usize);
        Ok(incidents)
    }

    async fn update_incident_status(&self, id: i64, status: &str) -> Result<Incident> {
        let mut state = self.state.lock().unwrap();
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| sentinel_core::Error::not_found("incident not found"))?;
        incident.status = status.to_string();
        incident.updated_at = Utc::now();
        Ok(incident.clone())
    }

    async fn recent_open_incident_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Incident>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .iter()
            .filter(|i| i.user_id == user_id && i.status == "open" && i.created_at >= since)
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn touch_incident(
        &self,
        id: i64,
        its_score: f64,
        severity: RiskLevel,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut state = self.state.lock().unwrap();
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| sentinel_core::Error::not_found("incident not found"))?;
        incident.its_score = its_score;
        if Self::rank(severity.as_str()) > Self::rank(&incident.severity) {
            incident.severity = severity.as_str().to_string();
        }
        incident.updated_at = now;
        Ok(incident.clone())
    }

    async fn incident_for_alert(&self, alert_id: i64) -> Result<Option<Incident>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .incidents
            .iter()
            .filter(|i| i.alert_id == Some(alert_id))
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn upsert_snapshot(&self, snapshot: &ItsSnapshot) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert((snapshot.user_id.clone(), snapshot.date), snapshot.clone());
        Ok(())
    }

    async fn snapshots_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> Result<Vec<ItsSnapshot>> {
        let state = self.state.lock().unwrap();
        let mut snapshots: Vec<_> = state
            .snapshots
            .values()
            .filter(|s| s.user_id == user_id && s.date >= from)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.date);
        Ok(snapshots)
    }

    async fn summarize_window(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ActivityWindowSummary> {
        let state = self.state.lock().unwrap();
        let matching: Vec<Activity> = state
            .activities
            .iter()
            .filter(|a| a.user_id.as_str() == user_id && a.timestamp >= from && a.timestamp < to)
            .cloned()
            .collect();
        Ok(ActivityWindowSummary::from_activities(&matching))
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().users.len() as i64)
    }

    async fn count_users_with_its_at_least(&self, threshold: f64) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.users.values().filter(|u| u.its_score >= threshold).count() as i64)
    }

    async fn average_its(&self) -> Result<f64> {
        let state = self.state.lock().unwrap();
        if state.users.is_empty() {
            return Ok(0.0);
        }
        Ok(state.users.values().map(|u| u.its_score).sum::<f64>() / state.users.len() as f64)
    }

    async fn users_with_risk_at_least(&self, level: RiskLevel) -> Result<Vec<MonitoredUser>> {
        let threshold = match level {
            RiskLevel::Low => 0.0,
            RiskLevel::Medium => 25.0,
            RiskLevel::High => 50.0,
            RiskLevel::Critical => 75.0,
        };
        let state = self.state.lock().unwrap();
        let mut users: Vec<_> = state
            .users
            .values()
            .filter(|u| u.its_score >= threshold)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.its_score.partial_cmp(&a.its_score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(users)
    }
}
