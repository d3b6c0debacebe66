use serde::{Deserialize, Serialize};
use std::fmt;

/// Standardized error codes for the detection platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // General System Errors (1000-1999)
    InternalServerError = 1000,
    ConfigurationError = 1001,
    ServiceUnavailable = 1002,
    Timeout = 1003,

    // Database Errors (2000-2999)
    DatabaseConnectionError = 2000,
    DatabaseConstraintViolation = 2001,
    DatabaseQueryError = 2002,

    // Network & Transport Errors (3000-3999)
    NetworkError = 3000,
    NetworkTimeout = 3001,
    NetworkConnectionRefused = 3002,
    SerializationError = 3003,

    // Input Validation Errors (4000-4999)
    ValidationFailed = 4000,
    InvalidInput = 4001,
    UnknownUser = 4002,
    InvalidIdentifier = 4003,

    // Resource Management Errors (5000-5999)
    ResourceNotFound = 5000,
    ResourceAlreadyExists = 5001,

    // Detection Pipeline Errors (6000-6999)
    DetectorError = 6000,
    EscalationConflict = 6001,
    TrainingFailed = 6002,

    // Observer Errors (7000-7999)
    ObserverFault = 7000,
}

impl ErrorCode {
    /// HTTP status this code maps to at the request boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::DetectorError
            | ErrorCode::TrainingFailed
            | ErrorCode::ObserverFault => 500,

            ErrorCode::ServiceUnavailable
            | ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseQueryError
            | ErrorCode::DatabaseConstraintViolation => 503,

            ErrorCode::Timeout | ErrorCode::NetworkTimeout => 504,

            ErrorCode::NetworkError
            | ErrorCode::NetworkConnectionRefused
            | ErrorCode::SerializationError => 502,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidIdentifier => 400,

            ErrorCode::UnknownUser | ErrorCode::ResourceNotFound => 404,

            ErrorCode::ResourceAlreadyExists | ErrorCode::EscalationConflict => 409,
        }
    }

    /// Category used for logging and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout => "system",

            ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseConstraintViolation
            | ErrorCode::DatabaseQueryError => "database",

            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::NetworkConnectionRefused
            | ErrorCode::SerializationError => "network",

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::UnknownUser
            | ErrorCode::InvalidIdentifier => "validation",

            ErrorCode::ResourceNotFound | ErrorCode::ResourceAlreadyExists => "resource",

            ErrorCode::DetectorError
            | ErrorCode::EscalationConflict
            | ErrorCode::TrainingFailed => "detection",

            ErrorCode::ObserverFault => "observer",
        }
    }

    /// Transient errors the agent may retry with backoff. Validation errors
    /// are final and must not be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ServiceUnavailable
                | ErrorCode::Timeout
                | ErrorCode::DatabaseConnectionError
                | ErrorCode::DatabaseQueryError
                | ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::NetworkConnectionRefused
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
