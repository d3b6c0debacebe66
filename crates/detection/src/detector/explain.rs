use super::features::FeatureVector;
use crate::model::{Activity, FileAction};
use sentinel_core::ActivityKind;

/// Human-readable explanation for a scored event, a semicolon-joined list
/// of the cues that contributed.
pub fn explanation(activity: &Activity, features: &FeatureVector, ml_score: f64) -> String {
    let details = &activity.details;
    let mut parts: Vec<String> = Vec::new();

    let file_size = if details.file_size_mb() > 0.0 {
        details.file_size_mb()
    } else {
        features.file_size_mb
    };
    if file_size > 50.0 {
        parts.push(format!("Large file access ({file_size:.1}MB)"));
    }
    if details.is_sensitive() || features.sensitive_file_count > 0.0 {
        parts.push("Sensitive file access detected".to_string());
    }
    if details.file_action() == Some(FileAction::Delete) || features.delete_count > 0.0 {
        parts.push("File deletion detected".to_string());
    }

    let transfer = if features.data_transfer_mb > 0.0 {
        features.data_transfer_mb
    } else {
        details.attachment_size_mb()
    };
    if transfer > 50.0 {
        parts.push(format!("Large data transfer ({transfer:.1}MB)"));
    }
    if features.external_connections >= 3.0 {
        parts.push(format!(
            "Multiple external connections ({})",
            features.external_connections as u32
        ));
    }

    if details.is_external() && transfer > 10.0 {
        parts.push("External email with attachment".to_string());
    }
    if details.suspicious_keywords() > 0 {
        parts.push("Suspicious keywords in communication".to_string());
    }

    if activity.is_off_hours() {
        parts.push(format!("Off-hours activity ({}:00)", activity.local_hour()));
    }

    if features.process_suspicious_score > 0.5 {
        match details.process_name() {
            Some(name) if !name.is_empty() => parts.push(format!("Suspicious process: {name}")),
            _ => parts.push("Suspicious process detected".to_string()),
        }
    }

    if features.rapid_activity_score > 0.5 {
        parts.push("Rapid activity pattern detected".to_string());
    }
    if features.pattern_deviation_score > 0.5 {
        parts.push("Behavioral pattern deviation".to_string());
    }
    if features.temporal_anomaly_score > 0.5 {
        parts.push("Unusual timing pattern".to_string());
    }

    if activity.kind == ActivityKind::Logon
        && (details.geo_anomaly() > 0 || activity.is_off_hours())
    {
        parts.push("Unusual login pattern".to_string());
    }

    if parts.is_empty() {
        parts.push(format!(
            "ML anomaly detected ({:.0}% confidence)",
            ml_score * 100.0
        ));
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{TimeZone, Utc};
    use sentinel_core::UserId;
    use uuid::Uuid;

    #[test]
    fn external_attachment_mentions_both_cues() {
        let activity = Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U002"),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 2, 0).unwrap(),
            kind: ActivityKind::Email,
            details: ActivityDetails::Email(EmailDetails {
                common: CommonDetails {
                    activity_hour: Some(14),
                    off_hours: Some(false),
                    ..Default::default()
                },
                external: true,
                attachment_size_mb: 120.0,
                suspicious_keywords: 1,
                ..Default::default()
            }),
        };
        let features = FeatureVector {
            data_transfer_mb: 120.0,
            email_attachment_mb: 120.0,
            ..Default::default()
        };
        let text = explanation(&activity, &features, 0.7);
        assert!(text.contains("Large data transfer (120.0MB)"), "{text}");
        assert!(text.contains("External email with attachment"), "{text}");
        assert!(text.contains("Suspicious keywords"), "{text}");
        assert!(!text.contains("Off-hours"), "{text}");
    }

    #[test]
    fn quiet_event_falls_back_to_confidence_line() {
        let activity = Activity {
            id: Uuid::new_v4(),
            user_id: UserId::from("U002"),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 14, 2, 0).unwrap(),
            kind: ActivityKind::Network,
            details: ActivityDetails::Network(NetworkDetails {
                common: CommonDetails {
                    activity_hour: Some(14),
                    off_hours: Some(false),
                    ..Default::default()
                },
                ..Default::default()
            }),
        };
        let text = explanation(&activity, &FeatureVector::default(), 0.42);
        assert_eq!(text, "ML anomaly detected (42% confidence)");
    }
}
