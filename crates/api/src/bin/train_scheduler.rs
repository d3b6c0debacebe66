//! # Model Training Scheduler
//!
//! Long-running retraining process: fits the ITS classifiers and the
//! detector's supervised scorer from stored history (or the synthetic
//! generator on a fresh deployment), writes the model artifact, then
//! sleeps until the next cycle. Runs alongside the ingest server, which
//! picks the artifact up on its reload tick.
//!
//! ```bash
//! cargo run --bin train-scheduler
//! ```

use sentinel_core::{Config, DatabasePool};
use sentinel_detection::training::{run_scheduler, TrainingPipeline};
use sentinel_detection::{PostgresRepository, Repository};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel_detection=info,train_scheduler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ML training scheduler...");

    let config = Config::load()?;
    let db = DatabasePool::wait_until_ready(&config.database).await?;
    let repository: Arc<dyn Repository> = Arc::new(PostgresRepository::new(db.pool.clone()));
    repository.initialize().await?;

    let artifact_path: PathBuf = std::env::var("MODEL_PATH")
        .unwrap_or_else(|_| "models/sentinel_models.json".to_string())
        .into();

    let pipeline = TrainingPipeline::new(
        repository,
        config.training.history_days,
        config.training.synthetic_samples,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!(
        interval_hours = config.training.interval_hours,
        artifact = %artifact_path.display(),
        "Scheduling retraining cycles"
    );
    run_scheduler(pipeline, config.training.interval_hours, artifact_path, shutdown_rx).await;

    Ok(())
}
