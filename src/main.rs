//! Rotator - Entry Point
//!
//! Loads the pool, then runs the proxy server and admin API with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rotator::api::ApiServer;
use rotator::config::{LogConfig, StoreBackend};
use rotator::pool::{FileSource, PoolManager, PoolOptions};
use rotator::proxy::ProxyServer;
use rotator::store::{MemoryStore, PgStore, ProxyStore};
use rotator::{Config, Database};

#[tokio::main]
async fn main() -> rotator::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Rotator");

    // Open the durable store
    let (store, db): (Arc<dyn ProxyStore>, Option<Database>) = match config.store.backend {
        StoreBackend::Postgres => {
            let db = Database::new(&config).await?;
            info!("Connected to database");

            db.run_migrations().await?;
            info!("Database migrations complete");

            (Arc::new(PgStore::new(db.pool().clone())), Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; the proxy list is lost on exit");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let manager = Arc::new(PoolManager::initialize(store, PoolOptions::from(&config.store)).await?);
    info!("Loaded {} proxies from store", manager.snapshot().records.len());

    // A bad candidate file is not fatal; keep serving what the store has
    let source = FileSource::new(&config.pool.candidate_file);
    if let Err(e) = manager.ingest(&source).await {
        warn!("Startup ingestion failed, continuing with stored pool: {}", e);
    }

    let (shutdown_tx, _) = watch::channel(false);

    let proxy_server = ProxyServer::new(config.proxy.clone(), manager.clone());
    let api_server = ApiServer::new(config.clone(), manager.clone());

    let proxy_shutdown = shutdown_tx.subscribe();
    let api_shutdown = shutdown_tx.subscribe();

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(proxy_shutdown).await {
            error!("Proxy server error: {}", e);
        }
    });

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Servers started - Proxy: {}, API: {}",
        config.proxy_addr(),
        config.api_addr()
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(proxy_task, api_task);

    if let Some(db) = db {
        db.close().await;
    }

    info!("Rotator stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides `LOG_LEVEL`.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rotator={},tower_http=info", log.level).into());

    let json = log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
