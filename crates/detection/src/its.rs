//! # Insider Threat Score Engine
//!
//! Computes the aggregate 0-100 per-user risk score by summarizing the
//! trailing seven-day activity window and scoring it with a weighted
//! ensemble: a gradient-boosted stump ensemble (0.5), a randomized forest
//! of decision stumps (0.3) and a normalized outlier score (0.2).
//!
//! Every scoring invocation upserts the user's daily snapshot, so the
//! historical series self-heals on read.

use crate::repository::{ActivityWindowSummary, Repository};
use chrono::{DateTime, Duration, Utc};
use sentinel_core::{utils, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

pub const ITS_FEATURE_COUNT: usize = 15;

/// Window feature vector in the order the models index it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ItsFeatures {
    pub role_encoded: f64,
    pub mean_logon_hour: f64,
    pub logon_count: f64,
    pub geo_anomaly: f64,
    pub file_accesses: f64,
    pub sensitive_file_access: f64,
    pub file_download_size_mb: f64,
    pub emails_sent: f64,
    pub external_emails: f64,
    pub large_attachments: f64,
    pub suspicious_keywords: f64,
    pub off_hours: f64,
    pub file_to_email_ratio: f64,
    pub external_email_ratio: f64,
    pub sensitive_access_rate: f64,
}

impl ItsFeatures {
    pub fn from_summary(role: &str, summary: &ActivityWindowSummary) -> Self {
        let mean_logon_hour = summary.mean_logon_hour;
        let off_hours = if utils::is_off_hours(mean_logon_hour.round().rem_euclid(24.0) as u32) {
            1.0
        } else {
            0.0
        };
        Self {
            role_encoded: encode_role(role),
            mean_logon_hour,
            logon_count: summary.logon_count as f64,
            geo_anomaly: summary.geo_anomalies as f64,
            file_accesses: summary.file_accesses as f64,
            sensitive_file_access: summary.sensitive_file_accesses as f64,
            file_download_size_mb: summary.downloaded_mb,
            emails_sent: summary.emails_sent as f64,
            external_emails: summary.external_emails as f64,
            large_attachments: summary.large_attachments as f64,
            suspicious_keywords: summary.suspicious_keywords as f64,
            off_hours,
            file_to_email_ratio: summary.file_accesses as f64 / (summary.emails_sent as f64 + 1.0),
            external_email_ratio: summary.external_emails as f64
                / (summary.emails_sent as f64 + 1.0),
            sensitive_access_rate: summary.sensitive_file_accesses as f64
                / (summary.file_accesses as f64 + 1.0),
        }
    }

    pub fn to_array(self) -> [f64; ITS_FEATURE_COUNT] {
        [
            self.role_encoded,
            self.mean_logon_hour,
            self.logon_count,
            self.geo_anomaly,
            self.file_accesses,
            self.sensitive_file_access,
            self.file_download_size_mb,
            self.emails_sent,
            self.external_emails,
            self.large_attachments,
            self.suspicious_keywords,
            self.off_hours,
            self.file_to_email_ratio,
            self.external_email_ratio,
            self.sensitive_access_rate,
        ]
    }
}

/// Roles carry a small encoded integer, unknown roles share a bucket.
pub fn encode_role(role: &str) -> f64 {
    match role {
        "Developer" => 0.0,
        "Finance" => 1.0,
        "HR" => 2.0,
        "Manager" => 3.0,
        "Sales" => 4.0,
        _ => 5.0,
    }
}

/// One decision stump: adds `delta` when the feature crosses its threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub delta: f64,
}

/// Additive stump ensemble, the gradient-boosted member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StumpEnsemble {
    pub base: f64,
    pub stumps: Vec<Stump>,
}

impl StumpEnsemble {
    pub fn score(&self, x: &[f64; ITS_FEATURE_COUNT]) -> f64 {
        let mut score = self.base;
        for stump in &self.stumps {
            if x[stump.feature] >= stump.threshold {
                score += stump.delta;
            }
        }
        score.clamp(0.0, 1.0)
    }
}

/// One randomized tree reduced to a stump with two leaf values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestTree {
    pub feature: usize,
    pub threshold: f64,
    pub low: f64,
    pub high: f64,
}

/// Averaged randomized stumps, the random-forest member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<ForestTree>,
}

impl ForestModel {
    pub fn score(&self, x: &[f64; ITS_FEATURE_COUNT]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .trees
            .iter()
            .map(|t| if x[t.feature] >= t.threshold { t.high } else { t.low })
            .sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

/// Unsupervised member: strongest weighted saturating deviation from the
/// population priors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItsOutlier {
    pub means: [f64; ITS_FEATURE_COUNT],
    pub stds: [f64; ITS_FEATURE_COUNT],
    pub weights: [f64; ITS_FEATURE_COUNT],
}

impl ItsOutlier {
    pub fn score(&self, x: &[f64; ITS_FEATURE_COUNT]) -> f64 {
        let mut strongest: f64 = 0.0;
        for i in 0..ITS_FEATURE_COUNT {
            let std = if self.stds[i] > 1e-9 { self.stds[i] } else { 1.0 };
            let z = (x[i] - self.means[i]) / std;
            // Volume features are one-sided: quieter than the prior is not
            // risk. The logon hour deviates in both directions.
            let deviation = if i == 1 { z.abs() } else { z.max(0.0) };
            let deviation = deviation.min(5.0);
            let response = deviation / (deviation + 1.0);
            strongest = strongest.max(self.weights[i] * response);
        }
        strongest.clamp(0.0, 1.0)
    }
}

/// The full ITS model set; replaced wholesale by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItsModels {
    pub boosted: StumpEnsemble,
    pub forest: ForestModel,
    pub outlier: ItsOutlier,
}

impl Default for ItsModels {
    fn default() -> Self {
        // Priors seeded from the same traffic shape the synthetic training
        // generator produces, so scoring is sane before the first cycle.
        Self {
            boosted: StumpEnsemble {
                base: 0.05,
                stumps: vec![
                    Stump { feature: 5, threshold: 5.0, delta: 0.50 },
                    Stump { feature: 14, threshold: 0.3, delta: 0.35 },
                    Stump { feature: 11, threshold: 1.0, delta: 0.20 },
                    Stump { feature: 13, threshold: 0.5, delta: 0.15 },
                    Stump { feature: 9, threshold: 2.0, delta: 0.15 },
                    Stump { feature: 10, threshold: 1.0, delta: 0.15 },
                    Stump { feature: 6, threshold: 500.0, delta: 0.20 },
                    Stump { feature: 3, threshold: 1.0, delta: 0.15 },
                    Stump { feature: 2, threshold: 6.0, delta: 0.10 },
                    Stump { feature: 4, threshold: 80.0, delta: 0.10 },
                ],
            },
            forest: ForestModel {
                trees: vec![
                    ForestTree { feature: 5, threshold: 4.0, low: 0.10, high: 0.85 },
                    ForestTree { feature: 14, threshold: 0.25, low: 0.15, high: 0.80 },
                    ForestTree { feature: 11, threshold: 1.0, low: 0.20, high: 0.70 },
                    ForestTree { feature: 6, threshold: 300.0, low: 0.10, high: 0.75 },
                    ForestTree { feature: 10, threshold: 1.0, low: 0.10, high: 0.70 },
                ],
            },
            outlier: ItsOutlier {
                means: [2.0, 9.0, 3.0, 0.0, 20.0, 1.0, 50.0, 15.0, 3.0, 0.5, 0.5, 0.0, 2.0, 0.2, 0.05],
                stds: [2.0, 4.0, 3.0, 0.5, 20.0, 3.0, 100.0, 10.0, 4.0, 1.0, 1.0, 0.3, 3.0, 0.3, 0.15],
                weights: [0.1, 0.5, 0.3, 0.7, 0.3, 0.8, 0.5, 0.3, 0.4, 0.5, 0.7, 0.6, 0.3, 0.5, 0.8],
            },
        }
    }
}

impl ItsModels {
    /// Weighted ensemble on the 0-1 scale.
    pub fn score(&self, x: &[f64; ITS_FEATURE_COUNT]) -> f64 {
        let boosted = self.boosted.score(x);
        let forest = self.forest.score(x);
        let outlier = self.outlier.score(x);
        (0.5 * boosted + 0.3 * forest + 0.2 * outlier).clamp(0.0, 1.0)
    }
}

/// Shared swappable registry for the ITS model set, seeded with the
/// defaults until the first training cycle replaces them.
pub struct ItsModelRegistry {
    models: RwLock<ItsModels>,
}

impl Default for ItsModelRegistry {
    fn default() -> Self {
        Self {
            models: RwLock::new(ItsModels::default()),
        }
    }
}

impl ItsModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, x: &[f64; ITS_FEATURE_COUNT]) -> f64 {
        self.models.read().expect("its registry poisoned").score(x)
    }

    pub fn swap(&self, models: ItsModels) {
        *self.models.write().expect("its registry poisoned") = models;
    }

    pub fn snapshot(&self) -> ItsModels {
        self.models.read().expect("its registry poisoned").clone()
    }
}

/// Result of one scoring invocation.
#[derive(Debug, Clone)]
pub struct ItsOutcome {
    pub score: f64,
    pub risk: RiskLevel,
    pub anomalies: Vec<String>,
}

pub struct ItsEngine {
    repository: Arc<dyn Repository>,
    models: Arc<ItsModelRegistry>,
    window_days: i64,
    fallback_events: i64,
}

impl ItsEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        models: Arc<ItsModelRegistry>,
        window_days: i64,
        fallback_events: i64,
    ) -> Self {
        Self {
            repository,
            models,
            window_days,
            fallback_events,
        }
    }

    /// Compute the user's ITS over the trailing window, persist the daily
    /// snapshot and refresh the cached score on the user row.
    pub async fn score_user(&self, user_id: &str, role: &str, now: DateTime<Utc>) -> Result<ItsOutcome> {
        let window_start = now - Duration::days(self.window_days);
        let mut summary = self
            .repository
            .summarize_window(user_id, window_start, now)
            .await?;

        let mut score = if summary.total_activities == 0 {
            // Window empty: score the most recent history instead, or
            // settle at the floor for a user with no activity at all.
            let recent = self
                .repository
                .latest_activities(user_id, self.fallback_events)
                .await?;
            if recent.is_empty() {
                let outcome = ItsOutcome {
                    score: 5.0,
                    risk: RiskLevel::Low,
                    anomalies: Vec::new(),
                };
                self.persist(user_id, &outcome, now).await?;
                return Ok(outcome);
            }
            summary = ActivityWindowSummary::from_activities(&recent);
            let features = ItsFeatures::from_summary(role, &summary);
            self.models.score(&features.to_array()) * 100.0
        } else {
            let features = ItsFeatures::from_summary(role, &summary);
            self.models.score(&features.to_array()) * 100.0
        };

        // Low raw scores for users with real activity get a floor scaled by
        // volume and recency.
        if score < 8.0 && summary.total_activities > 0 {
            let days_since = summary
                .most_recent
                .map(|ts| (now - ts).num_days() as f64)
                .unwrap_or(self.window_days as f64);
            let recency_factor = (1.0 - days_since / 7.0).max(0.5);
            let baseline = 8.0 + 0.2 * summary.total_activities as f64 * recency_factor;
            score = baseline.min(20.0);
        }

        let outcome = ItsOutcome {
            score,
            risk: RiskLevel::from_its(score),
            anomalies: anomaly_tags(&summary),
        };
        self.persist(user_id, &outcome, now).await?;
        Ok(outcome)
    }

    /// Compute and persist the snapshot for one historical calendar day,
    /// used by the read side to fill gaps in the series. The upsert's
    /// unique (user, day) constraint keeps concurrent readers idempotent.
    pub async fn snapshot_for_day(
        &self,
        user_id: &str,
        role: &str,
        day: DateTime<Utc>,
    ) -> Result<crate::model::ItsSnapshot> {
        let day = utils::day_floor(day);
        let end = day + Duration::days(1);
        let window_start = end - Duration::days(self.window_days);
        let summary = self
            .repository
            .summarize_window(user_id, window_start, end)
            .await?;

        let score = if summary.total_activities == 0 {
            5.0
        } else {
            let features = ItsFeatures::from_summary(role, &summary);
            let mut score = self.models.score(&features.to_array()) * 100.0;
            if score < 8.0 {
                let days_since = summary
                    .most_recent
                    .map(|ts| (end - ts).num_days() as f64)
                    .unwrap_or(7.0);
                let recency_factor = (1.0 - days_since / 7.0).max(0.5);
                score = (8.0 + 0.2 * summary.total_activities as f64 * recency_factor).min(20.0);
            }
            score
        };

        let snapshot = crate::model::ItsSnapshot {
            user_id: user_id.to_string(),
            date: day,
            its_score: score,
            risk_level: RiskLevel::from_its(score).as_str().to_string(),
            alert_count: self.repository.count_alerts_between(user_id, day, end).await?,
            activity_count: self
                .repository
                .count_activities_between(user_id, day, end)
                .await?,
        };
        self.repository.upsert_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    async fn persist(&self, user_id: &str, outcome: &ItsOutcome, now: DateTime<Utc>) -> Result<()> {
        let day = utils::day_floor(now);
        let tomorrow = day + Duration::days(1);
        let alert_count = self.repository.count_alerts_between(user_id, day, tomorrow).await?;
        let activity_count = self
            .repository
            .count_activities_between(user_id, day, tomorrow)
            .await?;
        self.repository
            .upsert_snapshot(&crate::model::ItsSnapshot {
                user_id: user_id.to_string(),
                date: day,
                its_score: outcome.score,
                risk_level: outcome.risk.as_str().to_string(),
                alert_count,
                activity_count,
            })
            .await?;
        self.repository
            .update_user_score(user_id, outcome.score, outcome.risk)
            .await?;
        Ok(())
    }

    pub fn models(&self) -> &Arc<ItsModelRegistry> {
        &self.models
    }
}

/// Threshold-guarded tags describing what drove the score.
pub fn anomaly_tags(summary: &ActivityWindowSummary) -> Vec<String> {
    let mut tags = Vec::new();
    if utils::is_off_hours(summary.mean_logon_hour.round().rem_euclid(24.0) as u32) {
        tags.push("off_hours_logon".to_string());
    }
    if summary.geo_anomalies > 0 {
        tags.push("geo_anomaly".to_string());
    }
    if summary.sensitive_file_accesses >= 5 {
        tags.push("excessive_sensitive_access".to_string());
    }
    let email_ratio = summary.external_emails as f64 / (summary.emails_sent as f64 + 1.0);
    if email_ratio > 0.5 {
        tags.push("high_external_email_ratio".to_string());
    }
    if summary.large_attachments > 2 {
        tags.push("large_attachments".to_string());
    }
    if summary.suspicious_keywords > 0 {
        tags.push("suspicious_keywords".to_string());
    }
    if summary.downloaded_mb > 500.0 {
        tags.push("excessive_download".to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::repository::memory::MemoryRepository;
    use chrono::TimeZone;
    use sentinel_core::{ActivityKind, UserId};
    use uuid::Uuid;

    fn engine(repo: Arc<MemoryRepository>) -> ItsEngine {
        ItsEngine::new(repo, Arc::new(ItsModelRegistry::new()), 7, 20)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
    }

    fn sensitive_delete(user: &str, minute: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from(user),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, minute, 0).unwrap(),
            kind: ActivityKind::FileAccess,
            details: ActivityDetails::FileAccess(FileAccessDetails {
                common: CommonDetails {
                    activity_hour: Some(14),
                    off_hours: Some(false),
                    ..Default::default()
                },
                sensitive: true,
                action: FileAction::Delete,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn user_with_no_activity_scores_the_floor() {
        let repo = Arc::new(MemoryRepository::new().with_user("U100", "Developer"));
        let outcome = engine(repo.clone()).score_user("U100", "Developer", now()).await.unwrap();
        assert_eq!(outcome.score, 5.0);
        assert_eq!(outcome.risk, RiskLevel::Low);
        assert!(outcome.anomalies.is_empty());

        let user = repo.get_user("U100").await.unwrap().unwrap();
        assert_eq!(user.its_score, 5.0);
        assert_eq!(user.risk_level, "low");
    }

    #[tokio::test]
    async fn sensitive_burst_raises_score_past_incident_bar() {
        let repo = Arc::new(MemoryRepository::new().with_user("U007", "Developer"));
        for i in 0..10 {
            repo.insert_activity(&sensitive_delete("U007", i)).await.unwrap();
        }
        let outcome = engine(repo).score_user("U007", "Developer", now()).await.unwrap();
        assert!(outcome.score > 65.0, "got {}", outcome.score);
        assert!(outcome.anomalies.contains(&"excessive_sensitive_access".to_string()));
    }

    #[tokio::test]
    async fn snapshot_upsert_is_idempotent_per_day() {
        let repo = Arc::new(MemoryRepository::new().with_user("U007", "Developer"));
        for i in 0..10 {
            repo.insert_activity(&sensitive_delete("U007", i)).await.unwrap();
        }
        let engine = engine(repo.clone());
        engine.score_user("U007", "Developer", now()).await.unwrap();
        engine.score_user("U007", "Developer", now()).await.unwrap();

        let day_start = sentinel_core::utils::day_floor(now());
        let snapshots = repo.snapshots_for_user("U007", day_start).await.unwrap();
        assert_eq!(snapshots.len(), 1, "one row per (user, day)");
        assert_eq!(snapshots[0].activity_count, 10);
    }

    #[tokio::test]
    async fn quiet_history_gets_volume_scaled_floor() {
        let repo = Arc::new(MemoryRepository::new().with_user("U020", "Sales"));
        // A couple of unremarkable daytime emails.
        for minute in [1, 2] {
            repo.insert_activity(&Activity {
                id: Uuid::new_v4(),
                user_id: UserId::from("U020"),
                timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 10, minute, 0).unwrap(),
                kind: ActivityKind::Email,
                details: ActivityDetails::Email(EmailDetails {
                    common: CommonDetails {
                        activity_hour: Some(10),
                        off_hours: Some(false),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            })
            .await
            .unwrap();
        }
        let outcome = engine(repo).score_user("U020", "Sales", now()).await.unwrap();
        assert!(outcome.score >= 8.0, "floored, got {}", outcome.score);
        assert!(outcome.score <= 20.0, "capped, got {}", outcome.score);
    }

    #[test]
    fn tags_fire_only_past_thresholds() {
        let mut summary = ActivityWindowSummary {
            mean_logon_hour: 10.0,
            ..Default::default()
        };
        assert!(anomaly_tags(&summary).is_empty());

        summary.sensitive_file_accesses = 5;
        summary.downloaded_mb = 501.0;
        summary.mean_logon_hour = 23.0;
        let tags = anomaly_tags(&summary);
        assert!(tags.contains(&"excessive_sensitive_access".to_string()));
        assert!(tags.contains(&"excessive_download".to_string()));
        assert!(tags.contains(&"off_hours_logon".to_string()));
        assert!(!tags.contains(&"geo_anomaly".to_string()));
    }
}
