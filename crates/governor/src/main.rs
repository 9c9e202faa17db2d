//! Resource Governor - adaptive resource management daemon
//!
//! Budgets a fixed local capacity across the configured services, adjusts
//! their guarantees from pushed samples and serves health, metrics and
//! snapshots over HTTP.

use anyhow::{Context, Result};
use governor_lib::{AdaptiveResourceManager, LoggingEnforcer};
use resource_governor::{api, config::AppConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-governor");

    let config = AppConfig::load()?;
    info!(
        instance = %config.governor.instance,
        resource = %config.governor.resource,
        total_capacity = config.governor.total_capacity,
        services = config.governor.services.len(),
        "Governor configured"
    );

    let manager = Arc::new(
        AdaptiveResourceManager::new(config.governor.clone(), Arc::new(LoggingEnforcer))
            .context("Failed to build resource manager")?,
    );
    manager.start().await;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let state = Arc::new(api::AppState::new(Arc::clone(&manager)));
    let addr = config.server.addr();
    let api_handle = tokio::spawn(async move {
        api::serve(&addr, state, async {
            let _ = stop_rx.await;
        })
        .await
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    manager.shutdown().await;
    let _ = stop_tx.send(());
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    Ok(())
}
