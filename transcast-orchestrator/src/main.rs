//! Transcast Orchestrator
//!
//! HTTP service that accepts declarative transcoding requests and runs them.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: SQLite registry of immutable pipeline snapshots
//! - Services: Pipeline creation and control, lifecycle and expiry
//! - API: axum handlers over the pipeline service
//!
//! Encoder processes are supervised by the runner library in this process.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcast_core::command::CommandSynthesizer;
use transcast_core::ports::PortAllocator;
use transcast_runner::repository::FsRecordStore;
use transcast_runner::service::{
    FfprobeService, OutputTracker, RcloneUploadService, Supervisor, UploadService,
};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use crate::config::Config;
use crate::repository::pipeline_repository;
use crate::service::lifecycle::LifecycleManager;
use crate::service::pipeline_service::{PipelineService, Timings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "transcast_orchestrator=debug,transcast_runner=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Transcast Orchestrator...");

    let config = load_config()?;
    info!(
        "Loaded configuration: work_dir={}, encoder={}",
        config.runner.work_dir.display(),
        config.runner.encoder
    );

    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Initialize services
    let records = Arc::new(
        FsRecordStore::new(&config.runner.work_dir)
            .await
            .context("Failed to prepare work directory")?,
    );
    let uploader: Arc<dyn UploadService> =
        Arc::new(RcloneUploadService::new(config.runner.uploader.clone()));
    let supervisor = Arc::new(Supervisor::new(&config.runner, records.clone(), uploader));
    let ports = Arc::new(PortAllocator::new(config.port_search_window));
    let lifecycle = LifecycleManager::new(pool.clone(), records.clone(), ports.clone());

    let persisted = pipeline_repository::list_all(&pool)
        .await
        .context("Failed to load persisted pipelines")?;
    let resumed = lifecycle.resume(persisted);
    if resumed > 0 {
        info!("Resumed expiry of {} persisted pipelines", resumed);
    }

    let service = Arc::new(PipelineService::new(
        pool,
        Arc::new(FfprobeService::new(config.runner.prober.clone())),
        CommandSynthesizer::new(config.runner.encoder.clone()),
        supervisor.clone(),
        OutputTracker::new(records, config.runner.output_lines),
        lifecycle,
        ports,
        config.parse_options(),
        Timings {
            stop_grace: config.stop_grace,
            purge_timeout: config.purge_timeout(),
        },
    ));

    info!("Services initialized");

    // Build router with all API endpoints
    let app = api::create_router(service);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    let stopped = supervisor.stop_all();
    if stopped > 0 {
        info!("Stopped {} running outputs", stopped);
        tokio::time::sleep(config.runner.kill_timeout).await;
    }

    info!("Orchestrator shut down");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
