mod api;
mod cloudflare;
mod config;
mod poller;
mod probe;
mod reconcile;
mod store;
mod store_manager;

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::poller::Poller;
use crate::probe::SlpProber;
use crate::store::db::StoreDb;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("srv_managerd=info"))
        )
        .init();

    tracing::info!("Starting srv-managerd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/srv-manager/managerd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Open SQLite database; an unusable store is fatal at startup
    let db = StoreDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let store = StoreHandle::spawn(db);
    let target_count = store.list().await.context("Failed to read targets")?.len();
    tracing::info!("{} servers registered", target_count);

    let provider = CloudflareClient::new(&config.provider)
        .context("Failed to build Cloudflare client")?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Start status poller
    let prober = SlpProber::new(config.poller.probe_timeout());
    let poller = Poller::new(store.clone(), prober, &config.poller).start(cancel.clone());

    // Build API router
    let app_state = api::routes::AppState {
        store: store.clone(),
        provider: Arc::new(provider),
        started_at: Instant::now(),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation, then let in-flight poll cycles finish writing
    cancel.cancel();
    let _ = tokio::join!(poller.stop(), server_handle);

    // Shutdown store thread
    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
