//! Alert bridge service binary.
//!
//! Serves the webhook producer and drains the in-process queue into the
//! consumer. `check-teams` validates a team directory document offline.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alert_bridge::{config::Config, server, wire, TeamDirectory};

/// How long shutdown waits for the queue worker to drain accepted messages.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Route Sentry and Datadog alerts to owning teams as Asana tasks.
#[derive(Parser)]
#[command(name = "alert-bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service and queue worker (default)
    Serve,

    /// Validate a team directory document and exit
    CheckTeams {
        /// Path to the team directory YAML
        #[arg(env = "BRIDGE_TEAMS_FILE", default_value = "data/teams.yaml")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(fmt::layer))
        .with(EnvFilter::from_default_env().add_directive("alert_bridge=info".parse()?))
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CheckTeams { file } => check_teams(&file),
    }
}

fn check_teams(file: &Path) -> Result<()> {
    let directory = TeamDirectory::load(file)
        .with_context(|| format!("Invalid team directory {}", file.display()))?;

    for team in directory.teams() {
        println!("{:<24} {:>3} matcher(s)", team.name, team.entities.len());
    }
    println!("default team: {}", directory.fallback().name);
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!(
        deployment = %config.deployment,
        development = config.development,
        "Starting alert bridge..."
    );

    let wired = wire(&config).await.context("Cold start failed")?;
    info!(
        teams = wired.directory.teams().len(),
        default_team = %wired.directory.fallback().name,
        "Services wired"
    );

    let consumer = wired.state.consumer.clone();
    let worker = wired.worker;
    let worker_handle = tokio::spawn(async move {
        worker.run(&consumer).await;
    });

    let refresher_handle = wired.refresher.map(|refresher| tokio::spawn(refresher.run()));

    let app = server::build_router(wired.state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(%addr, "Alert bridge listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    if let Some(handle) = refresher_handle {
        handle.abort();
    }

    // The router held the only queue sender, so the worker now drains what
    // was accepted and exits.
    info!("Draining queued messages...");
    match tokio::time::timeout(DRAIN_TIMEOUT, worker_handle).await {
        Ok(Ok(())) => info!("Queue drained"),
        Ok(Err(e)) => error!(error = %e, "Queue worker failed while draining"),
        Err(_) => warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Queue did not drain in time; undelivered messages are lost"
        ),
    }
    info!("Alert bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
