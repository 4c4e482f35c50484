//! CLI entry point for the network-discovery daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use discovery_ingest::{HttpIngestClient, IngestConfig};

use network_discovery::api::{self, AppState};
use network_discovery::policy::{PolicyManager, RunnerSettings};
use network_discovery::scanner::NmapProber;
use network_discovery::{config, logging};

const APP_NAME: &str = "network-discovery";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "network-discovery")]
#[command(version, about = "Policy-driven network discovery daemon")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = config::load(&cli.config)?;
    let startup = &loaded.config.network_discovery.config;

    logging::init(startup);
    tracing::info!(version = APP_VERSION, config = %cli.config.display(), "Starting network-discovery");

    let prober = NmapProber::new(&startup.nmap_path);
    let version = prober.verify_installation().await?;
    tracing::info!(nmap_version = %version.lines().next().unwrap_or_default().trim(), "Nmap verified");

    let diode = &loaded.config.diode.config;
    let client = HttpIngestClient::new(&IngestConfig {
        target: diode.target.clone(),
        api_key: diode.api_key.clone(),
        app_name: APP_NAME.to_string(),
        app_version: APP_VERSION.to_string(),
        timeout: diode.timeout(),
    })?;

    let settings = RunnerSettings {
        shutdown_grace: startup.shutdown_grace(),
        ..RunnerSettings::default()
    };
    let manager = Arc::new(PolicyManager::new(
        Arc::new(prober),
        Arc::new(client),
        settings,
    ));

    if !loaded.policies.is_empty() {
        let started = manager.start_policies(loaded.policies).await?;
        tracing::info!(policies = ?started, "Boot policies started");
    }

    let app = api::create_router(AppState::new(manager.clone(), APP_VERSION));
    let addr = startup.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping all policies");
    if let Err(e) = manager.stop_all().await {
        tracing::error!(error = %e, "Error stopping policies");
    }

    tracing::info!("network-discovery stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}
