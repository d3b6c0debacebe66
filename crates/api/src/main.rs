//! # SentinelIQ Ingest & Query Server
//!
//! The central HTTP service of the insider-threat platform, built with Axum
//! for high-performance async request handling. It provides:
//!
//! - **Activity ingest**: one event per call from the endpoint agents,
//!   driven through the detection pipeline
//! - **Read side**: dashboard statistics, per-user timelines, historical
//!   ITS and the three escalation tier lists
//! - **Interactive API docs**: Swagger UI with the OpenAPI specification
//! - **Security middleware**: CORS, security headers, request ID tracking
//! - **Health monitoring**: liveness and readiness endpoints
//!
//! ## Middleware Stack
//!
//! Requests flow through middleware in this order:
//! 1. **Security Headers**: CSP, X-Frame-Options, nosniff
//! 2. **Request ID**: unique tracking for request tracing
//! 3. **Tracing**: structured logging with correlation IDs
//! 4. **Compression**: gzip/brotli response compression
//! 5. **CORS**: cross-origin policies from configuration
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin sentinel-server
//! ```

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use axum::http::{HeaderName, HeaderValue, Method};
use sentinel_core::{Config, CorsConfig, DatabasePool};
use sentinel_detection::detector::{AnomalyDetector, ModelRegistry};
use sentinel_detection::escalation::{EscalationEngine, EscalationThresholds};
use sentinel_detection::its::{ItsEngine, ItsModelRegistry};
use sentinel_detection::training::ModelArtifact;
use sentinel_detection::{IngestPipeline, PostgresRepository, Repository};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api_middleware;
mod error;
mod handlers;
mod health;
mod state;

use crate::handlers::{activities, alerts, dashboard, incidents, ingest, threats, users};
use crate::state::AppState;

/// Where the training scheduler leaves its fitted model artifact.
fn model_artifact_path() -> PathBuf {
    std::env::var("MODEL_PATH")
        .unwrap_or_else(|_| "models/sentinel_models.json".to_string())
        .into()
}

fn build_cors_layer(cors_config: &CorsConfig) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let mut cors = CorsLayer::new();

    if cors_config.allowed_origins.contains(&"*".to_string()) {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Result<Vec<HeaderValue>, _> = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.parse())
            .collect();
        cors = cors.allow_origin(origins?);
    }

    if cors_config.allowed_methods.contains(&"*".to_string()) {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Result<Vec<Method>, _> = cors_config
            .allowed_methods
            .iter()
            .map(|method| method.parse())
            .collect();
        cors = cors.allow_methods(methods?);
    }

    if cors_config.allowed_headers.contains(&"*".to_string()) {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Result<Vec<HeaderName>, _> = cors_config
            .allowed_headers
            .iter()
            .map(|header| header.parse())
            .collect();
        cors = cors.allow_headers(headers?);
    }

    cors = cors.allow_credentials(cors_config.allow_credentials);
    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting SentinelIQ server...");

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    // The database container may still be starting; wait for it.
    let db = DatabasePool::wait_until_ready(&config.database).await?;
    info!("Database pool initialized");

    let repository: Arc<dyn Repository> = Arc::new(PostgresRepository::new(db.pool.clone()));
    repository.initialize().await?;
    info!("Schema bootstrap completed");

    // Model registries, preloaded from the training scheduler's artifact
    // when one exists.
    let detector_models = Arc::new(ModelRegistry::new());
    let its_models = Arc::new(ItsModelRegistry::new());
    match ModelArtifact::load(&model_artifact_path()) {
        Ok(Some(artifact)) => {
            info!(trained_at = %artifact.metrics.trained_at, "Loaded trained model artifact");
            detector_models.swap(artifact.detector);
            its_models.swap(artifact.its);
        }
        Ok(None) => info!("No trained model artifact found, serving with seeded defaults"),
        Err(e) => warn!("Could not load model artifact, serving with seeded defaults: {e}"),
    }

    let detector = Arc::new(AnomalyDetector::new(
        detector_models.clone(),
        config.detection.alert_threshold,
    ));
    let its = Arc::new(ItsEngine::new(
        repository.clone(),
        its_models.clone(),
        config.its.window_days,
        config.its.fallback_events,
    ));
    let escalation = Arc::new(EscalationEngine::new(
        repository.clone(),
        EscalationThresholds {
            alert: config.detection.alert_threshold,
            threat: config.detection.threat_threshold,
            incident: config.detection.incident_threshold,
        },
        config.detection.incident_dedup_hours,
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        repository.clone(),
        detector,
        its.clone(),
        escalation.clone(),
        config.detection.context_window_minutes,
        config.detection.context_cap,
        config.detection.suppression_hours,
    ));

    let state = AppState {
        display_tz: config.display.tz()?,
        config: config.clone(),
        repository,
        pipeline,
        its,
        escalation,
    };

    // Pick up retrained models without a restart.
    spawn_model_reload(detector_models, its_models);

    let app = create_app(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn create_app(state: AppState) -> Result<Router, Box<dyn std::error::Error>> {
    #[derive(OpenApi)]
    #[openapi(
        paths(
            health::health_check,
            health::readiness_check,
        ),
        tags(
            (name = "health", description = "Health check endpoints"),
            (name = "ingest", description = "Agent activity ingest"),
            (name = "users", description = "Monitored users"),
            (name = "escalation", description = "Alerts, threats and incidents"),
        )
    )]
    struct ApiDoc;

    let cors = build_cors_layer(&state.config.cors)?;

    let router = Router::new()
        .nest("/api", create_api_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(
                    api_middleware::security_headers::security_headers_middleware,
                ))
                .layer(axum::middleware::from_fn(
                    api_middleware::request_id::request_id_middleware,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
        .fallback(handler_404);

    Ok(router)
}

fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(ingest::ingest_routes())
        .nest("/users", users::user_routes())
        .nest("/users", activities::activity_routes())
        .nest("/alerts", alerts::alert_routes())
        .nest("/threats", threats::threat_routes())
        .nest("/incidents", incidents::incident_routes())
        .nest("/dashboard", dashboard::dashboard_routes())
        // The agent's connectivity probe hits /api/health.
        .route("/health", axum::routing::get(health::health_check))
}

/// Re-read the model artifact hourly so a completed training cycle is
/// picked up without a restart.
fn spawn_model_reload(detector_models: Arc<ModelRegistry>, its_models: Arc<ItsModelRegistry>) {
    tokio::spawn(async move {
        let mut last_trained_at = None;
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            match ModelArtifact::load(&model_artifact_path()) {
                Ok(Some(artifact)) => {
                    if last_trained_at != Some(artifact.metrics.trained_at) {
                        info!(trained_at = %artifact.metrics.trained_at, "Swapping in retrained models");
                        last_trained_at = Some(artifact.metrics.trained_at);
                        detector_models.swap(artifact.detector);
                        its_models.swap(artifact.its);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Model artifact reload failed: {e}"),
            }
        }
    });
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Resource not found"
        })),
    )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sentinel_api=debug,sentinel_detection=debug,sentinel_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
