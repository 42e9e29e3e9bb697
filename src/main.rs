use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use bulwark::config::BulwarkConfig;
use bulwark::ratelimit::{CleanupJob, RateLimiter, SqliteCounterStore};

/// Maintenance commands for the Bulwark rate limit store.
#[derive(Debug, Parser)]
#[command(name = "bulwark", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "BULWARK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Delete expired rate limit counters once and exit (for cron)
    Cleanup,
    /// Delete expired rate limit counters on an interval until stopped
    Run,
    /// Validate the configuration and print it as JSON
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = BulwarkConfig::load(cli.config.as_deref())?;

    bulwark::telemetry::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Bulwark");

    match cli.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Cleanup => {
            let limiter = open_limiter(&config).await?;
            let removed = limiter.cleanup_expired().await?;
            println!("{}", removed);
        }
        Command::Run => {
            let limiter = Arc::new(open_limiter(&config).await?);
            let job = CleanupJob::new(limiter, config.rate_limiting.cleanup_interval());
            let removed = job.run_until(shutdown_signal()).await;
            info!(removed, "Bulwark cleanup scheduler stopped");
        }
    }

    Ok(())
}

async fn open_limiter(config: &BulwarkConfig) -> anyhow::Result<RateLimiter> {
    let store = SqliteCounterStore::connect(
        &config.rate_limiting.database_url,
        config.rate_limiting.max_connections,
    )
    .await?;

    Ok(RateLimiter::new(Arc::new(store)).store_timeout(config.rate_limiting.store_timeout()))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
