use chrono::{DateTime, Utc};
use sentinel_core::{ActivityKind, RiskLevel, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A monitored user. Activities from ids not present here are rejected at
/// ingest.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonitoredUser {
    pub user_id: String,
    pub name: String,
    pub role: String,
    pub department: String,
    pub email: String,
    pub its_score: f64,
    pub risk_level: String,
    pub created_at: DateTime<Utc>,
}

/// Fields shared by every activity kind, supplied by the agent at
/// enrichment time. All defaulted so partial detail bags degrade gracefully
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommonDetails {
    /// Local hour of day at the endpoint, 0-23. Authoritative for all
    /// off-hours scoring; never derived from server time when present.
    #[serde(default)]
    pub activity_hour: Option<u32>,
    /// Off-hours flag computed by the agent from its local clock.
    #[serde(default)]
    pub off_hours: Option<bool>,
    /// Composite host/system identity string.
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub host_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    #[default]
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogonDetails {
    #[serde(flatten)]
    pub common: CommonDetails,
    #[serde(default)]
    pub logon_hour: Option<u32>,
    #[serde(default)]
    pub geo_anomaly: u32,
    #[serde(default)]
    pub new_login: bool,
    #[serde(default)]
    pub session_heartbeat: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileAccessDetails {
    #[serde(flatten)]
    pub common: CommonDetails,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub size_mb: f64,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub action: FileAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmailDetails {
    #[serde(flatten)]
    pub common: CommonDetails,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub attachment_size_mb: f64,
    #[serde(default)]
    pub suspicious_keywords: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessDetails {
    #[serde(flatten)]
    pub common: CommonDetails,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub suspicious: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkDetails {
    #[serde(flatten)]
    pub common: CommonDetails,
    #[serde(default)]
    pub data_sent_mb: f64,
    #[serde(default)]
    pub external_connections: u32,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Kind-specific activity payload. The five kinds are closed; the wire
/// format is a free-form detail bag that is deserialized into the variant
/// selected by the activity type, with every field defaulted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityDetails {
    Logon(LogonDetails),
    FileAccess(FileAccessDetails),
    Email(EmailDetails),
    Process(ProcessDetails),
    Network(NetworkDetails),
}

impl ActivityDetails {
    /// Deserialize a raw detail bag into the variant matching the activity
    /// kind. Unknown keys are ignored, missing keys take defaults.
    pub fn from_parts(kind: ActivityKind, raw: serde_json::Value) -> sentinel_core::Result<Self> {
        let parsed = match kind {
            ActivityKind::Logon => ActivityDetails::Logon(serde_json::from_value(raw)?),
            ActivityKind::FileAccess => ActivityDetails::FileAccess(serde_json::from_value(raw)?),
            ActivityKind::Email => ActivityDetails::Email(serde_json::from_value(raw)?),
            ActivityKind::Process => ActivityDetails::Process(serde_json::from_value(raw)?),
            ActivityKind::Network => ActivityDetails::Network(serde_json::from_value(raw)?),
        };
        Ok(parsed)
    }

    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityDetails::Logon(_) => ActivityKind::Logon,
            ActivityDetails::FileAccess(_) => ActivityKind::FileAccess,
            ActivityDetails::Email(_) => ActivityKind::Email,
            ActivityDetails::Process(_) => ActivityKind::Process,
            ActivityDetails::Network(_) => ActivityKind::Network,
        }
    }

    pub fn common(&self) -> &CommonDetails {
        match self {
            ActivityDetails::Logon(d) => &d.common,
            ActivityDetails::FileAccess(d) => &d.common,
            ActivityDetails::Email(d) => &d.common,
            ActivityDetails::Process(d) => &d.common,
            ActivityDetails::Network(d) => &d.common,
        }
    }

    /// Local hour for scoring: the agent-supplied hour, or for logons the
    /// logon hour. Callers fall back to the timestamp hour when absent.
    pub fn local_hour(&self) -> Option<u32> {
        if let Some(hour) = self.common().activity_hour {
            return Some(hour);
        }
        match self {
            ActivityDetails::Logon(d) => d.logon_hour,
            _ => None,
        }
    }

    pub fn file_size_mb(&self) -> f64 {
        match self {
            ActivityDetails::FileAccess(d) => d.size_mb,
            _ => 0.0,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, ActivityDetails::FileAccess(d) if d.sensitive)
    }

    pub fn file_action(&self) -> Option<FileAction> {
        match self {
            ActivityDetails::FileAccess(d) => Some(d.action),
            _ => None,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            ActivityDetails::FileAccess(d) => Some(d.file_path.as_str()),
            _ => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ActivityDetails::Email(d) if d.external)
    }

    pub fn attachment_size_mb(&self) -> f64 {
        match self {
            ActivityDetails::Email(d) => d.attachment_size_mb,
            _ => 0.0,
        }
    }

    pub fn suspicious_keywords(&self) -> u32 {
        match self {
            ActivityDetails::Email(d) => d.suspicious_keywords,
            _ => 0,
        }
    }

    pub fn data_sent_mb(&self) -> f64 {
        match self {
            ActivityDetails::Network(d) => d.data_sent_mb,
            _ => 0.0,
        }
    }

    pub fn external_connections(&self) -> u32 {
        match self {
            ActivityDetails::Network(d) => d.external_connections,
            _ => 0,
        }
    }

    pub fn process_name(&self) -> Option<&str> {
        match self {
            ActivityDetails::Process(d) => Some(d.process_name.as_str()),
            _ => None,
        }
    }

    pub fn is_suspicious_process(&self) -> bool {
        matches!(self, ActivityDetails::Process(d) if d.suspicious)
    }

    pub fn ip_address(&self) -> Option<&str> {
        match self {
            ActivityDetails::Network(d) => Some(d.ip_address.as_str()),
            _ => None,
        }
    }

    pub fn geo_anomaly(&self) -> u32 {
        match self {
            ActivityDetails::Logon(d) => d.geo_anomaly,
            _ => 0,
        }
    }
}

/// An observed endpoint event, persisted exactly once per ingest call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: UserId,
    /// Persisted in UTC; the agent-local hour travels in the details.
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub details: ActivityDetails,
}

impl Activity {
    /// Local hour at the endpoint, falling back to the UTC timestamp hour
    /// when the agent supplied none.
    pub fn local_hour(&self) -> u32 {
        use chrono::Timelike;
        self.details.local_hour().unwrap_or_else(|| self.timestamp.hour())
    }

    /// Off-hours verdict. When the agent supplied a local hour the verdict
    /// is derived from it exactly, never from server time; the agent's
    /// precomputed flag only fills in when no hour travelled with the
    /// event.
    pub fn is_off_hours(&self) -> bool {
        match self.details.local_hour() {
            Some(hour) => sentinel_core::utils::is_off_hours(hour),
            None => self
                .details
                .common()
                .off_hours
                .unwrap_or_else(|| sentinel_core::utils::is_off_hours(self.local_hour())),
        }
    }
}

/// Lifecycle of a tier-1 anomaly alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Validated,
    Dismissed,
    Escalated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Validated => "validated",
            AlertStatus::Dismissed => "dismissed",
            AlertStatus::Escalated => "escalated",
        }
    }

    /// Open alerts participate in fingerprint dedup.
    pub fn is_open(&self) -> bool {
        matches!(self, AlertStatus::New | AlertStatus::Validated)
    }
}

/// Tier 1: a candidate anomaly awaiting validation or escalation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnomalyAlert {
    pub id: i64,
    pub user_id: String,
    pub fingerprint: String,
    pub ml_score: f64,
    pub its_score: f64,
    pub risk_level: String,
    pub explanation: String,
    pub anomalies: serde_json::Value,
    pub status: String,
    pub viewed: bool,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnomalyAlert {
    pub fn display_id(&self) -> String {
        format!("ALT{:05}", self.id)
    }
}

/// Categories a threat can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    DataExfiltration,
    UnauthorizedAccess,
    Sabotage,
    PolicyViolation,
    SuspiciousActivity,
}

impl ThreatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::DataExfiltration => "data_exfiltration",
            ThreatCategory::UnauthorizedAccess => "unauthorized_access",
            ThreatCategory::Sabotage => "sabotage",
            ThreatCategory::PolicyViolation => "policy_violation",
            ThreatCategory::SuspiciousActivity => "suspicious_activity",
        }
    }
}

/// Tier 2: a promoted alert under investigation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Threat {
    pub id: i64,
    pub alert_id: Option<i64>,
    pub user_id: String,
    pub category: String,
    pub ml_score: f64,
    pub its_score: f64,
    pub fingerprint: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Threat {
    pub fn display_id(&self) -> String {
        format!("THR{:05}", self.id)
    }
}

/// Tier 3: a validated threat or an auto-promoted severe alert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Incident {
    pub id: i64,
    pub threat_id: Option<i64>,
    pub alert_id: Option<i64>,
    pub user_id: String,
    pub incident_type: String,
    pub severity: String,
    pub its_score: f64,
    pub description: String,
    pub evidence: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn display_id(&self) -> String {
        format!("INC{:05}", self.id)
    }
}

/// Dedup bookkeeping for one fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FingerprintRecord {
    pub fingerprint: String,
    pub user_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub observation_count: i64,
    pub escalated: bool,
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl FingerprintRecord {
    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.suppressed_until.map(|d| d > now).unwrap_or(false)
    }
}

/// One Insider Threat Score observation per (user, calendar day).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ItsSnapshot {
    pub user_id: String,
    /// Midnight (UTC) of the day being summarized.
    pub date: DateTime<Utc>,
    pub its_score: f64,
    pub risk_level: String,
    pub alert_count: i64,
    pub activity_count: i64,
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

/// Body of the ingest endpoint: one activity per call.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 2, max = 32))]
    pub user_id: String,
    /// ISO-8601; naive values are treated as UTC.
    pub timestamp: String,
    pub activity_type: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Alert payload mirrored into ingest responses and alert listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub ml_score: f64,
    pub its_score: f64,
    pub risk_level: String,
    pub anomalies: Vec<String>,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

/// Ingest response status, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    AlertGenerated,
    AnomalyAlertCreated,
    Suppressed,
    AlreadyEscalated,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
    pub its_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertPayload>,
}

/// Aggregate numbers for the dashboard read side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_users: i64,
    /// Users whose ITS is at or above the high band edge (>= 50).
    pub active_threats: i64,
    pub unread_alerts: i64,
    pub average_its: f64,
    pub high_risk_users: Vec<MonitoredUser>,
    pub recent_alerts: Vec<AnomalyAlert>,
}

/// Helper shared by the manual-conversion handlers: accepts `INC00001`,
/// `00001` and `1` forms.
pub fn parse_record_id(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().filter(|id| *id > 0)
}

/// Risk band used by the escalation pipeline: the stronger of the ML score
/// and the aggregate ITS decides, with critical/high edges tightened per
/// the escalation contract.
pub fn escalation_risk_level(ml_score: f64, its_score: f64) -> RiskLevel {
    if ml_score >= 0.80 || its_score >= 70.0 {
        RiskLevel::Critical
    } else if ml_score >= 0.60 || its_score >= 50.0 {
        RiskLevel::High
    } else if ml_score >= 0.40 || its_score >= 30.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
