//! # Ingest Pipeline
//!
//! One activity per call: validate the user, persist exactly once, score
//! through the detector, gate on the fingerprint (suppression and the
//! absorbing escalated state), then run the escalation triggers.
//!
//! Suppressed and already-escalated paths produce no side effects beyond
//! fingerprint bookkeeping.

use crate::detector::{AnomalyDetector, Detection};
use crate::escalation::{decide, EscalationEngine};
use crate::its::ItsEngine;
use crate::model::*;
use crate::repository::{NewAlert, Repository};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sentinel_core::{ActivityKind, Result, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Bounded read-through cache in front of the fingerprint table. The hash
/// is stable across restarts, so a cold cache only costs the first lookup.
pub struct FingerprintCache {
    capacity: usize,
    inner: Mutex<(HashMap<String, FingerprintRecord>, VecDeque<String>)>,
}

impl FingerprintCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    fn get(&self, fingerprint: &str) -> Option<FingerprintRecord> {
        self.inner.lock().expect("fingerprint cache poisoned").0.get(fingerprint).cloned()
    }

    fn put(&self, record: FingerprintRecord) {
        let mut guard = self.inner.lock().expect("fingerprint cache poisoned");
        let (map, order) = &mut *guard;
        if !map.contains_key(&record.fingerprint) {
            order.push_back(record.fingerprint.clone());
            if order.len() > self.capacity {
                if let Some(evicted) = order.pop_front() {
                    map.remove(&evicted);
                }
            }
        }
        map.insert(record.fingerprint.clone(), record);
    }
}

/// What the pipeline did for one ingested activity.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub response: IngestResponse,
    pub detection: Option<Detection>,
}

pub struct IngestPipeline {
    repository: Arc<dyn Repository>,
    detector: Arc<AnomalyDetector>,
    its: Arc<ItsEngine>,
    escalation: Arc<EscalationEngine>,
    fingerprints: FingerprintCache,
    context_window: Duration,
    context_cap: i64,
    suppression: Duration,
}

impl IngestPipeline {
    pub fn new(
        repository: Arc<dyn Repository>,
        detector: Arc<AnomalyDetector>,
        its: Arc<ItsEngine>,
        escalation: Arc<EscalationEngine>,
        context_window_minutes: i64,
        context_cap: i64,
        suppression_hours: i64,
    ) -> Self {
        Self {
            repository,
            detector,
            its,
            escalation,
            fingerprints: FingerprintCache::new(10_000),
            context_window: Duration::minutes(context_window_minutes),
            context_cap,
            suppression: Duration::hours(suppression_hours),
        }
    }

    /// Parse the wire request into a typed activity. Naive timestamps are
    /// treated as UTC.
    pub fn parse_request(request: &IngestRequest) -> Result<Activity> {
        let kind: ActivityKind = request.activity_type.parse()?;
        let timestamp = parse_timestamp(&request.timestamp)?;
        let details = ActivityDetails::from_parts(kind, request.details.clone())?;
        Ok(Activity {
            id: Uuid::new_v4(),
            user_id: UserId(request.user_id.clone()),
            timestamp,
            kind,
            details,
        })
    }

    /// Run the full ingest sequence for one activity.
    pub async fn ingest(&self, request: &IngestRequest, now: DateTime<Utc>) -> Result<IngestOutcome> {
        let user = self
            .repository
            .get_user(&request.user_id)
            .await?
            .ok_or_else(|| sentinel_core::Error::unknown_user(&request.user_id))?;

        let activity = Self::parse_request(request)?;
        self.repository.insert_activity(&activity).await?;

        let context = self
            .repository
            .recent_context(
                activity.user_id.as_str(),
                now - self.context_window,
                self.context_cap,
            )
            .await?;

        let detection = self.detector.evaluate(&activity, &context, now);

        // Fingerprint gate: suppression and the absorbing escalated state
        // short-circuit before any scoring side effects.
        let known = match self.fingerprints.get(&detection.fingerprint) {
            Some(record) => Some(record),
            None => self.repository.get_fingerprint(&detection.fingerprint).await?,
        };
        if let Some(record) = known {
            if record.escalated {
                let bumped = self
                    .repository
                    .observe_fingerprint(&detection.fingerprint, activity.user_id.as_str(), now)
                    .await?;
                self.fingerprints.put(bumped);
                debug!(fingerprint = %detection.fingerprint, "Repeat of escalated anomaly");
                return Ok(IngestOutcome {
                    response: IngestResponse {
                        status: IngestStatus::AlreadyEscalated,
                        its_score: user.its_score,
                        alert: None,
                    },
                    detection: Some(detection),
                });
            }
            if record.is_suppressed(now) {
                let bumped = self
                    .repository
                    .observe_fingerprint(&detection.fingerprint, activity.user_id.as_str(), now)
                    .await?;
                self.fingerprints.put(bumped);
                debug!(fingerprint = %detection.fingerprint, "Suppressed duplicate anomaly");

                // A suppressed duplicate produces no new alert, but tier
                // transitions still re-fire above the current level.
                let thresholds = *self.escalation.thresholds();
                let decision = decide(detection.ml_score, user.its_score, &thresholds);
                if decision.promote_threat || decision.promote_incident {
                    if let Some(alert) = self
                        .repository
                        .open_alert_for_fingerprint(&detection.fingerprint)
                        .await?
                    {
                        let threat_id = if decision.promote_threat {
                            let threat = self
                                .escalation
                                .promote_to_threat(&alert, &activity, detection.ml_score, user.its_score)
                                .await?;
                            Some(threat.id)
                        } else {
                            None
                        };
                        if decision.promote_incident {
                            self.escalation
                                .auto_promote_incident(
                                    &alert,
                                    &activity,
                                    threat_id,
                                    user.its_score,
                                    decision.risk,
                                    now,
                                )
                                .await?;
                        }
                    }
                }

                return Ok(IngestOutcome {
                    response: IngestResponse {
                        status: IngestStatus::Suppressed,
                        its_score: user.its_score,
                        alert: None,
                    },
                    detection: Some(detection),
                });
            }
        }

        let thresholds = *self.escalation.thresholds();
        if detection.is_anomaly && detection.ml_score >= thresholds.alert {
            let its = self.its.score_user(&user.user_id, &user.role, now).await?;
            let decision = decide(detection.ml_score, its.score, &thresholds);

            let record = self
                .repository
                .observe_fingerprint(&detection.fingerprint, activity.user_id.as_str(), now)
                .await?;
            self.fingerprints.put(record);

            let existing = self
                .repository
                .open_alert_for_fingerprint(&detection.fingerprint)
                .await?;
            let (alert, status) = match existing {
                None => {
                    let suppressed_until = now + self.suppression;
                    let alert = self
                        .repository
                        .create_alert(NewAlert {
                            user_id: user.user_id.clone(),
                            fingerprint: detection.fingerprint.clone(),
                            ml_score: detection.ml_score,
                            its_score: its.score,
                            risk_level: decision.risk,
                            explanation: detection.explanation.clone(),
                            anomalies: its.anomalies.clone(),
                            suppressed_until,
                        })
                        .await?;
                    self.repository
                        .set_fingerprint_suppression(&detection.fingerprint, suppressed_until)
                        .await?;
                    if let Some(mut cached) = self.fingerprints.get(&detection.fingerprint) {
                        cached.suppressed_until = Some(suppressed_until);
                        self.fingerprints.put(cached);
                    }
                    info!(
                        alert_id = alert.id,
                        user_id = %alert.user_id,
                        ml_score = detection.ml_score,
                        risk = %decision.risk,
                        "Anomaly alert created"
                    );
                    (alert, IngestStatus::AlertGenerated)
                }
                Some(open) => {
                    let refreshed = self
                        .repository
                        .refresh_alert(
                            open.id,
                            detection.ml_score,
                            its.score,
                            decision.risk,
                            &detection.explanation,
                            &its.anomalies,
                            now,
                        )
                        .await?;
                    (refreshed, IngestStatus::AnomalyAlertCreated)
                }
            };

            let threat_id = if decision.promote_threat {
                let threat = self
                    .escalation
                    .promote_to_threat(&alert, &activity, detection.ml_score, its.score)
                    .await?;
                Some(threat.id)
            } else {
                None
            };

            if decision.promote_incident {
                self.escalation
                    .auto_promote_incident(&alert, &activity, threat_id, its.score, decision.risk, now)
                    .await?;
            }

            let payload = AlertPayload {
                alert_id: alert.display_id(),
                ml_score: detection.ml_score,
                its_score: its.score,
                risk_level: decision.risk.as_str().to_string(),
                anomalies: its.anomalies.clone(),
                explanation: detection.explanation.clone(),
                timestamp: alert.updated_at,
            };
            return Ok(IngestOutcome {
                response: IngestResponse {
                    status,
                    its_score: its.score,
                    alert: Some(payload),
                },
                detection: Some(detection),
            });
        }

        // No anomaly: keep the aggregate score and daily snapshot current.
        let its = self.its.score_user(&user.user_id, &user.role, now).await?;
        Ok(IngestOutcome {
            response: IngestResponse {
                status: IngestStatus::Ok,
                its_score: its.score,
                alert: None,
            },
            detection: Some(detection),
        })
    }
}

/// ISO-8601 with or without timezone marker; naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(sentinel_core::utils::assume_utc(naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(sentinel_core::utils::assume_utc(naive));
    }
    Err(sentinel_core::Error::invalid_input(format!(
        "unparseable timestamp '{raw}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ModelRegistry;
    use crate::escalation::EscalationThresholds;
    use crate::its::ItsModelRegistry;
    use crate::repository::memory::MemoryRepository;
    use chrono::TimeZone;
    use serde_json::json;

    struct Harness {
        repo: Arc<MemoryRepository>,
        pipeline: IngestPipeline,
    }

    fn harness() -> Harness {
        let repo = Arc::new(
            MemoryRepository::new()
                .with_user("U002", "Developer")
                .with_user("U007", "Developer")
                .with_user("U050", "Sales"),
        );
        let repository: Arc<dyn Repository> = repo.clone();
        let detector = Arc::new(AnomalyDetector::new(Arc::new(ModelRegistry::new()), 0.30));
        let its = Arc::new(ItsEngine::new(
            repository.clone(),
            Arc::new(ItsModelRegistry::new()),
            7,
            20,
        ));
        let escalation = Arc::new(EscalationEngine::new(
            repository.clone(),
            EscalationThresholds::default(),
            2,
        ));
        let pipeline = IngestPipeline::new(repository, detector, its, escalation, 60, 100, 24);
        Harness { repo, pipeline }
    }

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, second).unwrap()
    }

    fn large_email_request(second: u32) -> IngestRequest {
        IngestRequest {
            user_id: "U002".to_string(),
            timestamp: format!("2024-06-03T14:02:{second:02}"),
            activity_type: "email".to_string(),
            details: json!({
                "external": true,
                "attachment_size_mb": 120.0,
                "suspicious_keywords": 1,
                "activity_hour": 14,
            }),
        }
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let h = harness();
        let request = IngestRequest {
            user_id: "U999".to_string(),
            timestamp: "2024-06-03T14:02:00".to_string(),
            activity_type: "email".to_string(),
            details: json!({}),
        };
        let err = h.pipeline.ingest(&request, at(14, 2, 0)).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(h.repo.activity_count(), 0);
    }

    #[tokio::test]
    async fn large_external_email_generates_alert() {
        let h = harness();
        let outcome = h.pipeline.ingest(&large_email_request(0), at(14, 2, 0)).await.unwrap();

        assert_eq!(outcome.response.status, IngestStatus::AlertGenerated);
        let alert = outcome.response.alert.expect("alert payload");
        assert!(alert.ml_score >= 0.45, "got {}", alert.ml_score);
        assert!(
            matches!(alert.risk_level.as_str(), "medium" | "high" | "critical"),
            "got {}",
            alert.risk_level
        );
        assert_eq!(h.repo.alert_count(), 1);

        // Suppression set 24 hours ahead on the fingerprint.
        let detection = outcome.detection.unwrap();
        let record = h.repo.get_fingerprint(&detection.fingerprint).await.unwrap().unwrap();
        assert_eq!(record.suppressed_until, Some(at(14, 2, 0) + Duration::hours(24)));
    }

    #[tokio::test]
    async fn duplicate_within_suppression_window_is_suppressed() {
        let h = harness();
        let first = h.pipeline.ingest(&large_email_request(0), at(14, 2, 0)).await.unwrap();
        assert_eq!(first.response.status, IngestStatus::AlertGenerated);

        let second = h.pipeline.ingest(&large_email_request(10), at(14, 2, 10)).await.unwrap();
        assert_eq!(second.response.status, IngestStatus::Suppressed);
        assert!(second.response.alert.is_none());

        // Activity still persisted; no second alert row.
        assert_eq!(h.repo.activity_count(), 2);
        assert_eq!(h.repo.alert_count(), 1);

        let fingerprint = second.detection.unwrap().fingerprint;
        let record = h.repo.get_fingerprint(&fingerprint).await.unwrap().unwrap();
        assert_eq!(record.observation_count, 2);
    }

    #[tokio::test]
    async fn sabotage_burst_promotes_to_threat_and_incident() {
        let h = harness();
        let mut last = None;
        for i in 0..10u32 {
            let request = IngestRequest {
                user_id: "U007".to_string(),
                timestamp: format!("2024-06-03T14:{:02}:{:02}", i / 5, (i % 5) * 12),
                activity_type: "file_access".to_string(),
                details: json!({
                    "action": "delete",
                    "sensitive": true,
                    "size_mb": 0,
                    "file_path": format!("/srv/finance/records/{i}.db"),
                    "activity_hour": 14,
                }),
            };
            last = Some(
                h.pipeline
                    .ingest(&request, at(14, i / 5, (i % 5) * 12))
                    .await
                    .unwrap(),
            );
        }

        let last = last.unwrap();
        let detection = last.detection.as_ref().unwrap();
        assert!(detection.ml_score >= 0.75, "got {}", detection.ml_score);
        assert!(last.response.its_score > 65.0, "got {}", last.response.its_score);
        assert!(h.repo.threat_count() >= 1);
        assert_eq!(h.repo.incident_count(), 1, "dedup keeps a single incident");

        let incidents = h.repo.list_incidents(None, 10).await.unwrap();
        assert_eq!(incidents[0].incident_type, "insider_attack");
    }

    #[tokio::test]
    async fn escalated_fingerprint_absorbs_repeats() {
        let h = harness();
        // Drive the same delete fingerprint until it escalates.
        let request = |i: u32| IngestRequest {
            user_id: "U007".to_string(),
            timestamp: format!("2024-06-03T14:00:{:02}", i),
            activity_type: "file_access".to_string(),
            details: json!({
                "action": "delete",
                "sensitive": true,
                "file_path": "/srv/finance/records/master.db",
                "activity_hour": 14,
            }),
        };
        let mut escalated_seen = false;
        for i in 0..12u32 {
            let outcome = h.pipeline.ingest(&request(i), at(14, 0, i)).await.unwrap();
            if outcome.response.status == IngestStatus::AlreadyEscalated {
                escalated_seen = true;
                break;
            }
        }
        assert!(escalated_seen, "repeat of an escalated fingerprint must absorb");
    }

    #[tokio::test]
    async fn first_off_hours_logon_alerts_medium() {
        let h = harness();
        let request = IngestRequest {
            user_id: "U050".to_string(),
            timestamp: "2024-06-03T23:00:00".to_string(),
            activity_type: "logon".to_string(),
            details: json!({
                "activity_hour": 23,
                "off_hours": true,
                "logon_hour": 23,
            }),
        };
        let outcome = h.pipeline.ingest(&request, at(23, 0, 0)).await.unwrap();
        assert_eq!(outcome.response.status, IngestStatus::AlertGenerated);
        let detection = outcome.detection.unwrap();
        assert_eq!(detection.features.off_hours_score, 0.8);
        let alert = outcome.response.alert.unwrap();
        assert_eq!(alert.risk_level, "medium");
    }

    #[tokio::test]
    async fn quiet_event_returns_ok_with_score() {
        let h = harness();
        let request = IngestRequest {
            user_id: "U002".to_string(),
            timestamp: "2024-06-03T10:15:00".to_string(),
            activity_type: "email".to_string(),
            details: json!({"activity_hour": 10, "off_hours": false}),
        };
        let outcome = h.pipeline.ingest(&request, at(10, 15, 0)).await.unwrap();
        assert_eq!(outcome.response.status, IngestStatus::Ok);
        assert!(outcome.response.alert.is_none());
        assert!(outcome.response.its_score >= 5.0);
        assert_eq!(h.repo.alert_count(), 0);
    }

    #[test]
    fn timestamps_parse_naive_and_offset_forms() {
        assert_eq!(
            parse_timestamp("2024-06-03T14:02:00").unwrap(),
            at(14, 2, 0)
        );
        assert_eq!(
            parse_timestamp("2024-06-03T14:02:00Z").unwrap(),
            at(14, 2, 0)
        );
        assert_eq!(
            parse_timestamp("2024-06-03T19:32:00+05:30").unwrap(),
            at(14, 2, 0)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }
}
