//! SentinelIQ Endpoint Activity Agent
//!
//! Monitors file, process, network and login activity on this workstation
//! and streams a normalized activity feed to the central ingest service.
//! Resilient by design: observer faults are contained, transport failures
//! queue events locally, and shutdown prints a statistics summary.

use clap::Parser;
use colored::*;
use sentinel_core::UserId;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregator;
mod config;
mod diagnostics;
mod observers;
mod transport;

use aggregator::Aggregator;
use config::AgentConfig;
use observers::{FileObserver, LoginObserver, NetworkObserver, Observer, ProcessObserver};
use transport::{Transport, UserVerification};

#[derive(Parser)]
#[command(name = "sentinel-agent")]
#[command(version)]
#[command(about = "SentinelIQ endpoint activity monitoring agent")]
#[command(long_about = "
SentinelIQ Endpoint Agent - real-time activity monitoring

Observes file system, process, network and login activity on this
workstation and streams it to the central detection service. The agent
verifies its user id against the server at startup, queues events locally
when the server is unreachable, and keeps monitoring through transient
failures.

Examples:
  sentinel-agent --user-id U042
  sentinel-agent --user-id U042 --server http://10.0.0.12:8000
  sentinel-agent --user-id U042 --interval 10 --alert-interval 30
")]
struct Cli {
    /// Monitored user id (format: U followed by digits, e.g. U042)
    #[arg(long)]
    user_id: String,

    /// Base URL of the ingest server
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    /// Seconds between observer polls
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Seconds between uploads to the server
    #[arg(long = "alert-interval", default_value_t = 20)]
    alert_interval: u64,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if !UserId::is_valid(&cli.user_id) {
        eprintln!(
            "{} user id '{}' does not match the expected U<digits> pattern",
            "error:".red().bold(),
            cli.user_id
        );
        process::exit(2);
    }

    let mut config = AgentConfig::new(cli.user_id.clone(), cli.server.clone());
    config.poll_interval = std::time::Duration::from_secs(cli.interval.max(1));
    config.upload_interval = std::time::Duration::from_secs(cli.alert_interval.max(1));

    let transport = match Transport::new(&config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(1);
        }
    };

    // Startup handshake: a missing user is fatal, an unreachable server is
    // degraded mode.
    match transport.verify_user(&config.user_id).await {
        UserVerification::Verified(profile) => {
            let name = profile["user"]["name"].as_str().unwrap_or("(unnamed)");
            println!(
                "{} monitoring as {} ({})",
                "✓".green().bold(),
                config.user_id.cyan(),
                name
            );
        }
        UserVerification::NotFound => {
            eprintln!(
                "{} user '{}' is not registered on the server; aborting",
                "error:".red().bold(),
                config.user_id
            );
            process::exit(1);
        }
        UserVerification::Unreachable(detail) => {
            diagnostics::print_connectivity_report(&config.server_url, &detail);
        }
    }

    let mut observer_boxes: Vec<Box<dyn Observer>> = Vec::new();
    if config.enable_file {
        observer_boxes.push(Box::new(FileObserver::new(
            config.monitored_paths.clone(),
            config.sensitive_patterns.clone(),
        )));
    }
    if config.enable_process {
        observer_boxes.push(Box::new(ProcessObserver::new()));
    }
    if config.enable_network {
        observer_boxes.push(Box::new(NetworkObserver::new()));
    }
    if config.enable_login {
        observer_boxes.push(Box::new(LoginObserver::new()));
    }

    let aggregator = Arc::new(Aggregator::new(config.clone(), observer_boxes, transport));
    aggregator.start_observers();
    info!(
        "Agent running: polling every {:?}, uploading every {:?}",
        config.poll_interval, config.upload_interval
    );

    let started = std::time::Instant::now();
    let poll_task = {
        let aggregator = aggregator.clone();
        let mut interval = tokio::time::interval(config.poll_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                aggregator.poll_observers().await;
            }
        })
    };
    let upload_task = {
        let aggregator = aggregator.clone();
        let mut interval = tokio::time::interval(config.upload_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                aggregator.flush().await;
            }
        })
    };

    wait_for_shutdown().await;
    info!("Shutdown requested, draining observers...");

    poll_task.abort();
    upload_task.abort();

    // Final drain and delivery attempt before reporting.
    aggregator.poll_observers().await;
    aggregator.flush().await;
    aggregator.stop_observers();

    print_summary(&aggregator, started.elapsed()).await;
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn print_summary(aggregator: &Aggregator, uptime: std::time::Duration) {
    use std::sync::atomic::Ordering;

    println!();
    println!("{}", "── Session summary ──────────────────────".bold());
    println!("  uptime:           {}s", uptime.as_secs());
    for (name, total) in aggregator.observer_totals() {
        println!("  {name} events:{}{total}", " ".repeat(12 - name.len().min(12)));
    }
    let stats = &aggregator.stats;
    println!("  collected:        {}", stats.collected.load(Ordering::Relaxed));
    println!("  delivered:        {}", stats.sent.load(Ordering::Relaxed));
    println!("  rejected:         {}", stats.rejected.load(Ordering::Relaxed));
    println!("  alerts received:  {}", stats.alerts_received.load(Ordering::Relaxed));
    println!("  offline backlog:  {}", aggregator.offline_backlog().await);
    println!("{}", "─────────────────────────────────────────".bold());
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
