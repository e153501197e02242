//! PDT API (pdt-api) - Main entry point
//!
//! Serves the REST API and, unless disabled, runs the sync task worker in
//! the same process so that `trigger_sync` requests are executed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pdt_api::{build_router, AppState};
use pdt_common::config::load_config;
use pdt_common::db::init_database;
use pdt_sync::{init_tracing, sync_context, BackgroundServices, TaskQueue};
use tokio::signal;
use tracing::{error, info, warn};

/// Command-line arguments for pdt-api
#[derive(Parser, Debug)]
#[command(name = "pdt-api")]
#[command(about = "REST API for PDT deployment and migration tracking")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to bind, overriding `[api] bind`
    #[arg(short, long, env = "PDT_API_BIND")]
    bind: Option<String>,

    /// Do not run the task worker in this process
    #[arg(long)]
    no_worker: bool,

    /// Also run the periodic scheduler in this process
    #[arg(long)]
    with_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    info!(
        "Starting PDT API (git: {}, built: {}, profile: {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db = init_database(&config.database.path)
        .await
        .context("Failed to initialize database")?;
    info!(path = %config.database.path.display(), "Database ready");

    let (queue, receiver) = TaskQueue::new();
    let services = if args.no_worker {
        warn!("Task worker disabled, trigger_sync requests will be rejected");
        drop(receiver);
        None
    } else {
        let ctx = sync_context(&config, db.clone(), queue.clone()).context("Failed to set up sync tasks")?;
        Some(BackgroundServices::start(Arc::new(ctx), receiver, &config, args.with_scheduler))
    };

    let api_token = config.api_token().map(str::to_string);
    if api_token.is_none() {
        warn!("No API token configured, API authentication is disabled");
    }

    let app = build_router(AppState::new(db, queue, api_token));

    let bind = args.bind.unwrap_or_else(|| config.api.bind.clone());
    info!("Starting HTTP server on {}", bind);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(services) = services {
        services.shutdown().await;
    }

    info!("Server shutdown complete");
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
