use super::baseline::UserBaseline;
use crate::model::{Activity, ActivityDetails, FileAction};
use chrono::{DateTime, Duration, Utc};
use sentinel_core::ActivityKind;

/// Keywords that mark a process as suspicious regardless of its flag.
pub const SUSPICIOUS_PROCESS_KEYWORDS: [&str; 10] = [
    "tor", "vpn", "remote", "ssh", "ftp", "nmap", "wireshark", "metasploit", "burp", "sqlmap",
];

pub const FEATURE_COUNT: usize = 13;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "file_size_mb",
    "file_count",
    "sensitive_file_count",
    "delete_count",
    "data_transfer_mb",
    "external_connections",
    "email_attachment_mb",
    "external_emails",
    "off_hours_score",
    "process_suspicious_score",
    "rapid_activity_score",
    "pattern_deviation_score",
    "temporal_anomaly_score",
];

/// The 13-dimensional behavioral feature vector scored by the ensemble.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureVector {
    pub file_size_mb: f64,
    pub file_count: f64,
    pub sensitive_file_count: f64,
    pub delete_count: f64,
    pub data_transfer_mb: f64,
    pub external_connections: f64,
    pub email_attachment_mb: f64,
    pub external_emails: f64,
    pub off_hours_score: f64,
    pub process_suspicious_score: f64,
    pub rapid_activity_score: f64,
    pub pattern_deviation_score: f64,
    pub temporal_anomaly_score: f64,
}

impl FeatureVector {
    pub fn to_array(self) -> [f64; FEATURE_COUNT] {
        [
            self.file_size_mb,
            self.file_count,
            self.sensitive_file_count,
            self.delete_count,
            self.data_transfer_mb,
            self.external_connections,
            self.email_attachment_mb,
            self.external_emails,
            self.off_hours_score,
            self.process_suspicious_score,
            self.rapid_activity_score,
            self.pattern_deviation_score,
            self.temporal_anomaly_score,
        ]
    }
}

pub fn process_looks_suspicious(details: &ActivityDetails) -> bool {
    if details.is_suspicious_process() {
        return true;
    }
    match details.process_name() {
        Some(name) => {
            let lowered = name.to_lowercase();
            SUSPICIOUS_PROCESS_KEYWORDS.iter().any(|kw| lowered.contains(kw))
        }
        None => false,
    }
}

/// Extract the feature vector for one event against its trailing context
/// and the user's baseline as it stood before this event.
///
/// Baseline-missing is a valid signal, not an error: every baseline-derived
/// feature falls back to a conservative default.
pub fn extract(
    activity: &Activity,
    context: &[Activity],
    baseline: Option<&UserBaseline>,
    now: DateTime<Utc>,
) -> FeatureVector {
    let details = &activity.details;

    let file_count = context
        .iter()
        .filter(|a| a.kind == ActivityKind::FileAccess)
        .count() as f64;
    let sensitive_file_count = context
        .iter()
        .filter(|a| a.details.is_sensitive())
        .count() as f64;
    let delete_count = context
        .iter()
        .filter(|a| a.details.file_action() == Some(FileAction::Delete))
        .count() as f64;

    let mut file_size_mb = details.file_size_mb();
    if file_size_mb == 0.0 && activity.kind == ActivityKind::FileAccess {
        file_size_mb = context.iter().map(|a| a.details.file_size_mb()).sum();
    }

    let data_transfer_mb = if details.data_sent_mb() > 0.0 {
        details.data_sent_mb()
    } else {
        details.attachment_size_mb()
    };

    let external_emails = context
        .iter()
        .filter(|a| a.details.is_external())
        .count() as f64;

    let off_hours_score = off_hours_score(activity, baseline);

    let process_suspicious_score = if process_looks_suspicious(details) { 1.0 } else { 0.0 };

    let rapid_activity_score = rapid_activity_score(activity, context, baseline, now);
    let pattern_deviation_score = pattern_deviation_score(activity, context, baseline);
    let temporal_anomaly_score = temporal_anomaly_score(context, baseline);

    FeatureVector {
        file_size_mb,
        file_count,
        sensitive_file_count,
        delete_count,
        data_transfer_mb,
        external_connections: details.external_connections() as f64,
        email_attachment_mb: details.attachment_size_mb(),
        external_emails,
        off_hours_score,
        process_suspicious_score,
        rapid_activity_score,
        pattern_deviation_score,
        temporal_anomaly_score,
    }
}

/// Off-hours score from the user's baseline.
///
/// Zero inside working hours. Outside them: 0.8 with no baseline, otherwise
/// one minus the relative frequency of this hour against the peak hour,
/// floored at 0.3 when the hour is among the user's typical hours.
pub fn off_hours_score(activity: &Activity, baseline: Option<&UserBaseline>) -> f64 {
    let hour = activity.local_hour();
    if !sentinel_core::utils::is_off_hours(hour) {
        return 0.0;
    }

    let baseline = match baseline {
        Some(b) if b.observations > 0 => b,
        _ => return 0.8,
    };

    if baseline.is_typical_hour(hour) {
        return 0.3;
    }

    let peak = baseline.peak_hour_frequency();
    if peak == 0 {
        return 0.8;
    }
    let current = baseline.hour_frequency[(hour % 24) as usize];
    let deviation = 1.0 - current as f64 / peak as f64;
    deviation.clamp(0.0, 1.0)
}

/// Z-score of the trailing 5-minute same-kind count against the user's
/// per-kind mean rate, normalized by three sigma and clipped to [0, 1].
fn rapid_activity_score(
    activity: &Activity,
    context: &[Activity],
    baseline: Option<&UserBaseline>,
    now: DateTime<Utc>,
) -> f64 {
    let baseline = match baseline {
        Some(b) => b,
        None => return 0.0,
    };

    let avg_rate = baseline.rate_for(activity.kind);
    if avg_rate <= 0.0 {
        return 0.0;
    }

    let recent_count = five_minute_count(activity.kind, context, now) as f64;
    let z = (recent_count - avg_rate) / (avg_rate.sqrt() + 1.0);
    (z / 3.0).clamp(0.0, 1.0)
}

/// Same-kind events within the trailing five minutes.
pub fn five_minute_count(kind: ActivityKind, context: &[Activity], now: DateTime<Utc>) -> usize {
    let cutoff = now - Duration::minutes(5);
    context
        .iter()
        .filter(|a| a.kind == kind && a.timestamp > cutoff)
        .count()
}

/// |current-kind frequency - baseline-kind frequency| / max(baseline, 0.1),
/// clipped to [0, 1].
fn pattern_deviation_score(
    activity: &Activity,
    context: &[Activity],
    baseline: Option<&UserBaseline>,
) -> f64 {
    let baseline = match baseline {
        Some(b) if b.total_events() > 0 => b,
        _ => return 0.0,
    };

    let typical = baseline.kind_frequency(activity.kind);
    let total = context.len().max(1) as f64;
    let current = context.iter().filter(|a| a.kind == activity.kind).count() as f64 / total;

    let deviation = (current - typical).abs() / typical.max(0.1);
    deviation.clamp(0.0, 1.0)
}

/// 0.6 when the trailing 10-event sequence is absent from the baseline's
/// typical sequences; zero when no sequences have been sampled yet.
fn temporal_anomaly_score(context: &[Activity], baseline: Option<&UserBaseline>) -> f64 {
    let baseline = match baseline {
        Some(b) => b,
        None => return 0.0,
    };

    let trailing: Vec<ActivityKind> = context
        .iter()
        .rev()
        .take(10)
        .map(|a| a.kind)
        .rev()
        .collect();

    match baseline.matches_typical_sequence(&trailing) {
        Some(false) => 0.6,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::TimeZone;
    use sentinel_core::UserId;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
    }

    fn email_activity(hour: u32, attachment_mb: f64, external: bool) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U002"),
            timestamp: at(hour, 0),
            kind: ActivityKind::Email,
            details: ActivityDetails::Email(EmailDetails {
                common: CommonDetails {
                    activity_hour: Some(hour),
                    off_hours: Some(sentinel_core::utils::is_off_hours(hour)),
                    ..Default::default()
                },
                external,
                attachment_size_mb: attachment_mb,
                ..Default::default()
            }),
        }
    }

    fn delete_activity(hour: u32, minute: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U007"),
            timestamp: at(hour, minute),
            kind: ActivityKind::FileAccess,
            details: ActivityDetails::FileAccess(FileAccessDetails {
                common: CommonDetails {
                    activity_hour: Some(hour),
                    off_hours: Some(false),
                    ..Default::default()
                },
                sensitive: true,
                action: FileAction::Delete,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn email_features_pick_up_attachment_transfer() {
        let activity = email_activity(14, 120.0, true);
        let features = extract(&activity, &[activity.clone()], None, at(14, 0));
        assert_eq!(features.data_transfer_mb, 120.0);
        assert_eq!(features.email_attachment_mb, 120.0);
        assert_eq!(features.external_emails, 1.0);
        assert_eq!(features.off_hours_score, 0.0);
    }

    #[test]
    fn off_hours_score_defaults_without_baseline() {
        let activity = email_activity(23, 0.0, false);
        assert_eq!(off_hours_score(&activity, None), 0.8);

        let daytime = email_activity(14, 0.0, false);
        assert_eq!(off_hours_score(&daytime, None), 0.0);
    }

    #[test]
    fn off_hours_score_drops_with_habitual_activity() {
        let mut baseline = UserBaseline::default();
        for _ in 0..14 {
            baseline.record(23, ActivityKind::Logon, 1.0, &[], Utc::now());
        }
        let activity = email_activity(23, 0.0, false);
        let score = off_hours_score(&activity, Some(&baseline));
        assert!(score < 0.3, "habitual hour should score low, got {score}");
    }

    #[test]
    fn rapid_burst_saturates_score() {
        let mut baseline = UserBaseline::default();
        baseline.record(14, ActivityKind::FileAccess, 1.0, &[], Utc::now());

        let now = at(14, 2);
        let context: Vec<Activity> = (0..10).map(|i| delete_activity(14, i / 5)).collect();
        let current = context.last().unwrap().clone();
        let features = extract(&current, &context, Some(&baseline), now);
        assert_eq!(features.rapid_activity_score, 1.0);
        assert_eq!(features.delete_count, 10.0);
        assert_eq!(features.sensitive_file_count, 10.0);
    }

    #[test]
    fn boundary_hours_follow_off_hours_interval() {
        for (hour, expected) in [(6, true), (7, false), (18, false), (19, true)] {
            let activity = email_activity(hour, 0.0, false);
            let score = off_hours_score(&activity, None);
            if expected {
                assert!(score > 0.0, "hour {hour} should be off-hours");
            } else {
                assert_eq!(score, 0.0, "hour {hour} should be working hours");
            }
        }
    }
}
