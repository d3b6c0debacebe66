//! # ML Anomaly Detector
//!
//! Scores one event in the context of the user's trailing activity window
//! and behavioral baseline. The ensemble combines an unsupervised outlier
//! scorer with an optional trained regression scorer, then a curated
//! pattern stage boosts known threat cues, capped at 0.95.
//!
//! The detector is total: it always returns a score and an explanation,
//! never an error. A missing baseline is a valid signal and degrades every
//! derived feature to a conservative default.

pub mod baseline;
pub mod ensemble;
pub mod explain;
pub mod features;
pub mod fingerprint;

pub use baseline::{BaselineMap, UserBaseline};
pub use ensemble::{DetectorModels, FeatureScaler, LinearModel, ModelRegistry, OutlierModel};
pub use features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES, SUSPICIOUS_PROCESS_KEYWORDS};

use crate::model::Activity;
use chrono::{DateTime, Utc};
use ensemble::SCORE_CAP;
use std::sync::Arc;

/// Verdict for one scored event.
#[derive(Debug, Clone)]
pub struct Detection {
    pub is_anomaly: bool,
    /// Final confidence in [0, 0.95]. The cap is max confidence, not a
    /// "not an anomaly" marker.
    pub ml_score: f64,
    pub explanation: String,
    pub fingerprint: String,
    pub features: FeatureVector,
}

pub struct AnomalyDetector {
    baselines: BaselineMap,
    models: Arc<ModelRegistry>,
    alert_threshold: f64,
}

impl AnomalyDetector {
    pub fn new(models: Arc<ModelRegistry>, alert_threshold: f64) -> Self {
        Self {
            baselines: BaselineMap::new(),
            models,
            alert_threshold,
        }
    }

    /// Score one event against its trailing context.
    ///
    /// Features are extracted against the baseline as it stood before this
    /// event; the event is folded into the baseline afterwards, so a user's
    /// very first off-hours event scores against no history.
    pub fn evaluate(&self, activity: &Activity, context: &[Activity], now: DateTime<Utc>) -> Detection {
        let handle = self.baselines.handle(activity.user_id.as_str());
        let mut baseline = handle.lock().expect("baseline lock poisoned");

        let seen_before = baseline.observations > 0;
        let features = features::extract(
            activity,
            context,
            seen_before.then_some(&*baseline),
            now,
        );

        let verdict = self.models.score(&features);
        let same_kind_recent = context
            .iter()
            .filter(|a| a.kind == activity.kind)
            .count();
        let boost = ensemble::pattern_boost(activity, &features, same_kind_recent);
        let ml_score = (verdict.score + boost).min(SCORE_CAP);

        let is_anomaly = ml_score >= self.alert_threshold || verdict.outlier_vote;
        let explanation = explain::explanation(activity, &features, ml_score);
        let fingerprint = fingerprint::generate(activity);

        // Fold the event into the baseline after scoring.
        let recent_rate = features::five_minute_count(activity.kind, context, now) as f64;
        let trailing: Vec<_> = context.iter().map(|a| a.kind).collect();
        baseline.record(activity.local_hour(), activity.kind, recent_rate, &trailing, now);

        Detection {
            is_anomaly,
            ml_score,
            explanation,
            fingerprint,
            features,
        }
    }

    pub fn baselines(&self) -> &BaselineMap {
        &self.baselines
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::TimeZone;
    use sentinel_core::{ActivityKind, UserId};
    use uuid::Uuid;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(Arc::new(ModelRegistry::new()), 0.30)
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
    }

    fn email(user: &str, day: u32, hour: u32, attachment_mb: f64, external: bool, keywords: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from(user),
            timestamp: at(day, hour, 2),
            kind: ActivityKind::Email,
            details: ActivityDetails::Email(EmailDetails {
                common: CommonDetails {
                    activity_hour: Some(hour),
                    off_hours: Some(sentinel_core::utils::is_off_hours(hour)),
                    ..Default::default()
                },
                external,
                attachment_size_mb: attachment_mb,
                suspicious_keywords: keywords,
                ..Default::default()
            }),
        }
    }

    fn logon(user: &str, day: u32, hour: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from(user),
            timestamp: at(day, hour, 0),
            kind: ActivityKind::Logon,
            details: ActivityDetails::Logon(LogonDetails {
                common: CommonDetails {
                    activity_hour: Some(hour),
                    off_hours: Some(sentinel_core::utils::is_off_hours(hour)),
                    ..Default::default()
                },
                logon_hour: Some(hour),
                ..Default::default()
            }),
        }
    }

    fn sensitive_delete(user: &str, day: u32, minute: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from(user),
            timestamp: at(day, 14, minute),
            kind: ActivityKind::FileAccess,
            details: ActivityDetails::FileAccess(FileAccessDetails {
                common: CommonDetails {
                    activity_hour: Some(14),
                    off_hours: Some(false),
                    ..Default::default()
                },
                sensitive: true,
                action: FileAction::Delete,
                size_mb: 0.0,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn large_external_email_flags_with_boosted_score() {
        let detector = detector();
        let activity = email("U002", 3, 14, 120.0, true, 1);
        let context = vec![activity.clone()];
        let detection = detector.evaluate(&activity, &context, at(3, 14, 2));

        assert!(detection.is_anomaly);
        // +0.25 external attachment, +0.15 large transfer, +0.20 keywords.
        assert!(detection.ml_score >= 0.45, "got {}", detection.ml_score);
        // Must not reach the auto-incident band on its own.
        assert!(detection.ml_score < 0.70, "got {}", detection.ml_score);
        assert!(detection.explanation.contains("External email with attachment"));
    }

    #[test]
    fn fingerprint_stable_for_duplicate_events() {
        let detector = detector();
        let first = email("U002", 3, 14, 120.0, true, 1);
        let second = email("U002", 3, 14, 120.0, true, 1);
        let a = detector.evaluate(&first, &[first.clone()], at(3, 14, 2));
        let b = detector.evaluate(&second, &[first.clone(), second.clone()], at(3, 14, 2));
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn sabotage_burst_crosses_threat_threshold() {
        let detector = detector();
        let context: Vec<Activity> = (0..10).map(|i| sensitive_delete("U007", 3, i)).collect();
        // Warm the baseline so the rapid-activity rate has a reference point.
        let warmup = sensitive_delete("U007", 1, 0);
        detector.evaluate(&warmup, &[warmup.clone()], at(1, 14, 0));

        let current = context.last().unwrap().clone();
        let detection = detector.evaluate(&current, &context, at(3, 14, 9));
        assert!(detection.is_anomaly);
        assert!(detection.ml_score >= 0.75, "got {}", detection.ml_score);
        assert!(detection.explanation.contains("File deletion detected"));
    }

    #[test]
    fn first_off_hours_event_scores_conservative_default() {
        let detector = detector();
        let activity = logon("U050", 3, 23);
        let detection = detector.evaluate(&activity, &[activity.clone()], at(3, 23, 0));

        assert_eq!(detection.features.off_hours_score, 0.8);
        assert!(detection.is_anomaly);
        assert!(detection.ml_score >= 0.40, "got {}", detection.ml_score);
        assert!(detection.ml_score < 0.60, "got {}", detection.ml_score);
    }

    #[test]
    fn habitual_off_hours_stops_alerting() {
        let detector = detector();
        // Two weeks of the same 23:00 logon.
        for day in 1..=14 {
            let activity = logon("U050", day, 23);
            detector.evaluate(&activity, &[activity.clone()], at(day, 23, 0));
        }
        let activity = logon("U050", 15, 23);
        let detection = detector.evaluate(&activity, &[activity.clone()], at(15, 23, 0));
        assert!(detection.features.off_hours_score < 0.3, "got {}", detection.features.off_hours_score);
        assert!(!detection.is_anomaly, "score {}", detection.ml_score);
    }

    #[test]
    fn detector_is_total_on_empty_context() {
        let detector = detector();
        let activity = email("U099", 3, 10, 0.0, false, 0);
        let detection = detector.evaluate(&activity, &[], at(3, 10, 0));
        assert!(!detection.is_anomaly);
        assert!(!detection.explanation.is_empty());
    }
}
