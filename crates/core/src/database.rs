//! # Database Pool Management
//!
//! PostgreSQL connection pooling for the ingest service and the training
//! scheduler, plus a bounded wait-for-ready loop used at startup so the
//! service can come up before (or while) the database container does.
//!
//! Schema ownership: the persistence layer in `sentinel-detection` is the
//! sole writer of tier records and daily snapshots; this module only hands
//! out pools.

use crate::{config::DatabaseConfig, error::Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};

/// Database pool wrapper shared across handlers and background workers.
#[derive(Clone)]
pub struct DatabasePool {
    /// Main PostgreSQL connection pool.
    pub pool: PgPool,
    /// Configuration used for pool creation.
    config: DatabaseConfig,
}

impl DatabasePool {
    /// Creates a new database pool with the specified configuration.
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        info!("Initializing database pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        info!("Database pool initialized successfully");

        Ok(Self { pool, config })
    }

    /// Waits for the database to accept connections, retrying with a fixed
    /// delay up to the configured attempt budget.
    pub async fn wait_until_ready(config: &DatabaseConfig) -> Result<Self> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match Self::new(config.clone()).await {
                Ok(db) => match db.ping().await {
                    Ok(()) => {
                        info!("Database is ready (attempt {attempt})");
                        return Ok(db);
                    }
                    Err(e) if attempt < config.ready_max_attempts => {
                        warn!("Database not ready yet (attempt {attempt}/{}): {e}", config.ready_max_attempts);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if attempt < config.ready_max_attempts => {
                    warn!("Database not ready yet (attempt {attempt}/{}): {e}", config.ready_max_attempts);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(Duration::from_secs(config.ready_retry_delay_secs)).await;
        }
    }

    /// Cheap liveness probe used by health checks and the readiness loop.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}
