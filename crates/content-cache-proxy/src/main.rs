//! Content Cache Proxy
//!
//! Serves upstream blobs through the multi-tier content cache and exposes
//! its maintenance operations over HTTP.

mod error;
mod fetcher;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::fetcher::HttpBlobLoader;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use content_cache::CacheCoordinator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("content_cache_proxy=info".parse()?)
        .add_directive("content_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Content Cache Proxy...");

    let config = ProxyConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.blob.cache_dir);
    info!(
        "Blob tier: {} items / {} MB",
        config.cache.blob.max_items,
        config.cache.blob.max_bytes / (1024 * 1024)
    );
    info!(
        "Optimize interval: {} seconds",
        config.cache.optimize_interval.as_secs()
    );

    let loader = HttpBlobLoader::new(config.fetch_timeout)?;
    let cache = Arc::new(CacheCoordinator::new(&config.cache, Arc::new(loader)));
    cache.init().await;

    cache.clone().spawn_optimizer(config.cache.optimize_interval);

    let (pressure_tx, pressure_rx) = mpsc::channel(4);
    cache.clone().listen_for_memory_pressure(pressure_rx);
    forward_memory_pressure(pressure_tx)?;

    let state: SharedState = Arc::new(ServerState::new(cache));

    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Treat SIGUSR1 as a memory-pressure notification
#[cfg(unix)]
fn forward_memory_pressure(tx: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut signals = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while signals.recv().await.is_some() {
            info!("Received SIGUSR1, shedding cache");
            if tx.try_send(()).is_err() {
                tracing::debug!("Memory pressure already queued");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_memory_pressure(_tx: mpsc::Sender<()>) -> Result<()> {
    Ok(())
}
