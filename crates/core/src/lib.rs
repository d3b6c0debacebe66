pub mod config;
pub mod database;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{Config, CorsConfig, DetectionConfig, DisplayConfig, TrainingConfig};
pub use database::DatabasePool;
pub use error::{Error, ErrorCode, Result};
pub use types::*;


// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
