//! vodforge - Media Transcoding Backend
//!
//! A transcoding orchestration engine with content-addressable output
//! storage, live segment publishing and orphan reconciliation.

use std::sync::Arc;

use tracing::{error, info};
use vodforge::config::Settings;
use vodforge::database;
use vodforge::logging::init_logging;
use vodforge::services::ServiceContainer;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging first so everything below is visible
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let (logging_config, _guard) = init_logging(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting vodforge v{}", env!("CARGO_PKG_VERSION"));

    // Load environment variables
    dotenvy::dotenv().ok();
    let settings = Settings::from_env_or_default();

    // Initialize database
    info!("Connecting to database: {}", settings.database_url);
    let pool = database::init_pool(&settings.database_url).await?;

    info!("Running database migrations...");
    database::run_migrations(&pool).await?;

    // Create service container
    info!("Initializing services...");
    let container = Arc::new(ServiceContainer::new(pool, settings).await?);

    // Start log retention cleanup task
    logging_config.start_retention_cleanup(container.cancellation_token());

    // Initialize all services (startup recovery, cleanup loop, flusher)
    container.initialize().await?;

    // Start API server
    container.start_api_server().await?;

    info!("vodforge started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown
    info!("Shutting down services...");
    if let Err(e) = container.shutdown().await {
        error!("Error during shutdown: {}", e);
    }

    info!("vodforge shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// Wait for SIGTERM signal (Windows - uses ctrl_c as fallback).
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
