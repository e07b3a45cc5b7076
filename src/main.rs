//! WaZhop Cache - Offline-resilient caching layer for the storefront
//!
//! Runs the interception worker in front of the origin, together with the
//! key-value and prefetch endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wazhop_cache::api::create_router;
use wazhop_cache::clock::system_clock;
use wazhop_cache::fetch::HttpFetcher;
use wazhop_cache::kv::{FileStore, KeyValueStore, MemoryStore};
use wazhop_cache::{AppState, Config, Scheduler};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main entry point for the WaZhop cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the key-value tier and spawn the interception worker
/// 4. Install and activate the worker (precache + old partition purge)
/// 5. Start the periodic sweeps
/// 6. Create Axum router with all endpoints
/// 7. Serve until SIGINT/SIGTERM, then stop the sweeps
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wazhop_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting WaZhop Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: origin={}, namespace={}, kv_max_bytes={}, port={}",
        config.origin_url, config.cache_namespace, config.kv_max_bytes, config.server_port
    );

    let kv_store: Box<dyn KeyValueStore> = match &config.kv_path {
        Some(path) => {
            let store = FileStore::open(path)
                .with_context(|| format!("opening key-value store at {}", path.display()))?;
            info!("Key-value tier persisted to {}", path.display());
            Box::new(store)
        }
        None => Box::new(MemoryStore::new()),
    };

    let fetcher = Arc::new(HttpFetcher::default());
    let (state, worker_task) = AppState::from_config(&config, fetcher, kv_store, system_clock())
        .context("invalid ORIGIN_URL")?;

    let report = state.worker.install().await?;
    info!(
        "Worker installed: {} precached, {} failed",
        report.cached.len(),
        report.failed.len()
    );
    let purged = state.worker.activate().await?;
    info!("Worker active, {} old partitions purged", purged);

    let scheduler = Scheduler::start(&config, &state.cache, &state.worker, &state.prefetch);
    info!("Background sweeps started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let failed = scheduler.shutdown().await;
    if failed > 0 {
        warn!("{} background sweeps had failed before shutdown", failed);
    }
    // The router held the last worker handles, so the worker drains and exits
    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker_task).await {
        Ok(Err(e)) => warn!("Interception worker ended abnormally: {}", e),
        Err(_) => warn!("Interception worker still busy after {:?}", WORKER_DRAIN_TIMEOUT),
        Ok(Ok(())) => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
