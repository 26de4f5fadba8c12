mod config;
mod http_api;
mod image_processor;
mod metrics_ledger;
mod object_store;
mod retry;
mod s3_storage;
mod service;
mod url_cache;
mod variants;

use anyhow::{Context, Result};
use config::Config;
use http_api::{start_api_server, AppState};
use s3_storage::S3PhotoStore;
use service::PhotoStorageService;
use std::sync::Arc;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Storefront Photo Storage Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        S3PhotoStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 photo store")?,
    );

    let service = Arc::new(PhotoStorageService::new(
        store,
        &config.upload,
        &config.cache,
        &config.cleanup,
    ));

    // Create API state
    let api_state = AppState {
        service: service.clone(),
    };

    // Spawn background sweeper task
    let sweeper_handle = if config.cleanup.enabled {
        let sweeper_service = service.clone();
        let interval = config.cleanup_interval();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the sweep
            // starts one full interval after boot
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match sweeper_service.cleanup_unused(None).await {
                    Ok(removed) => {
                        info!(removed, "Scheduled photo sweep completed");
                    }
                    Err(e) => {
                        error!(error = %e, "Scheduled photo sweep failed");
                    }
                }
            }
        }))
    } else {
        info!("Background photo sweep disabled");
        None
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Photo storage service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down photo storage service");

    // Abort tasks
    if let Some(handle) = sweeper_handle {
        handle.abort();
    }
    api_handle.abort();

    info!("Photo storage service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
