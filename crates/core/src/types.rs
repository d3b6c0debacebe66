use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier of a monitored user, e.g. `U042`.
///
/// User ids are assigned by the organization and validated against the
/// `U<digits>` pattern at the edges (agent CLI, ingest handler).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Whether the raw value matches the `U<digits>` pattern.
    pub fn is_valid(raw: &str) -> bool {
        static PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^U\d+$").expect("static pattern"));
        PATTERN.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Composite endpoint identity: the same user on two machines must remain
/// distinguishable, so the device id combines host name and system name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub host_name: String,
    pub system_name: String,
}

impl DeviceId {
    pub fn new(host_name: impl Into<String>, system_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            system_name: system_name.into(),
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.host_name, self.system_name)
    }
}

/// The five closed activity kinds accepted by the ingest endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Logon,
    FileAccess,
    Email,
    Process,
    Network,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Logon,
        ActivityKind::FileAccess,
        ActivityKind::Email,
        ActivityKind::Process,
        ActivityKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Logon => "logon",
            ActivityKind::FileAccess => "file_access",
            ActivityKind::Email => "email",
            ActivityKind::Process => "process",
            ActivityKind::Network => "network",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logon" => Ok(ActivityKind::Logon),
            "file_access" => Ok(ActivityKind::FileAccess),
            "email" => Ok(ActivityKind::Email),
            "process" => Ok(ActivityKind::Process),
            "network" => Ok(ActivityKind::Network),
            other => Err(crate::error::Error::validation(format!(
                "unknown activity type '{other}'"
            ))),
        }
    }
}

/// Risk bands used across alerts, threats, incidents and the ITS.
///
/// Band edges on the 0-100 scale: low < 25 <= medium < 50 <= high < 75 <= critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Band for an aggregate score on the 0-100 ITS scale.
    pub fn from_its(score: f64) -> Self {
        if score >= 75.0 {
            RiskLevel::Critical
        } else if score >= 50.0 {
            RiskLevel::High
        } else if score >= 25.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(crate::error::Error::validation(format!(
                "unknown risk level '{other}'"
            ))),
        }
    }
}
