//! PDT Sync (pdt-sync) - Main entry point
//!
//! Runs the periodic scheduler and the task worker that keep local cases in
//! step with the issue tracker and flush the outbound email queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pdt_common::config::load_config;
use pdt_common::db::init_database;
use pdt_sync::{init_tracing, sync_context, BackgroundServices, Task, TaskQueue};
use tokio::signal;
use tracing::{error, info};

/// Command-line arguments for pdt-sync
#[derive(Parser, Debug)]
#[command(name = "pdt-sync")]
#[command(about = "Issue tracker synchronization service for PDT")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one full tracker fetch at startup
    #[arg(long)]
    fetch_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    info!(
        "Starting PDT Sync (git: {}, built: {}, profile: {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!(path = %config.database.path.display(), "Opening database");

    let db = init_database(&config.database.path)
        .await
        .context("Failed to initialize database")?;

    let (queue, receiver) = TaskQueue::new();
    let ctx = Arc::new(sync_context(&config, db, queue.clone()).context("Failed to set up sync tasks")?);

    if args.fetch_now {
        queue.enqueue(Task::FetchCases).context("Failed to enqueue initial fetch")?;
    }

    let services = BackgroundServices::start(ctx, receiver, &config, true);

    shutdown_signal().await;
    services.shutdown().await;

    info!("Sync service shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
