use super::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Low priority errors that don't affect pipeline functionality
    Low,
    /// Medium priority errors that may degrade detection quality
    Medium,
    /// High priority errors that affect core functionality
    High,
    /// Critical errors that require immediate attention
    Critical,
}

/// Main error type for the detection platform
#[derive(Debug, ThisError, Clone)]
#[error("[{code}] {message}")]
pub struct Error {
    /// Standardized error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional detailed description
    pub details: Option<String>,
    /// Error severity
    pub severity: ErrorSeverity,
}

impl Error {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            severity: Self::default_severity_for_code(code),
        }
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set error severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Get HTTP status code
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    // Convenience constructors for the common cases.

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn unknown_user(user_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UnknownUser, format!("unknown user '{user_id}'"))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseQueryError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn observer(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ObserverFault, message).with_severity(ErrorSeverity::Low)
    }

    /// Convert to JSON for API responses. Internal detail is never leaked
    /// across the request boundary; 5xx responses carry a generic message.
    pub fn to_api_response(&self) -> serde_json::Value {
        let message = if self.http_status() >= 500 {
            "Internal error".to_string()
        } else {
            self.message.clone()
        };
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": message,
            }
        })
    }

    fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
        match code {
            ErrorCode::InternalServerError | ErrorCode::ConfigurationError => ErrorSeverity::Critical,
            ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseConstraintViolation
            | ErrorCode::DatabaseQueryError
            | ErrorCode::TrainingFailed => ErrorSeverity::High,
            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::NetworkConnectionRefused
            | ErrorCode::ServiceUnavailable
            | ErrorCode::Timeout
            | ErrorCode::DetectorError
            | ErrorCode::EscalationConflict
            | ErrorCode::SerializationError => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::not_found("record not found"),
            sqlx::Error::Database(db) if db.constraint().is_some() => Error::new(
                ErrorCode::DatabaseConstraintViolation,
                "database constraint violation",
            )
            .with_details(db.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Error::new(ErrorCode::DatabaseConnectionError, "database unavailable")
                    .with_details(err.to_string())
            }
            _ => Error::database("database query failed").with_details(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorCode::SerializationError, "serialization failed").with_details(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::new(ErrorCode::ConfigurationError, "configuration error").with_details(err.to_string())
    }
}
