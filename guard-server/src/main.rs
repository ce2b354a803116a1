mod analytics;
mod auth;
mod config;
mod errors;
mod insight;
mod metrics;
mod model;
mod rest;
mod store;
mod sync;
mod validate;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::insight::{GeminiBackend, InsightClient};
use crate::rest::AppState;
use crate::store::{make_pool, PgStore};
use crate::sync::{Synchronizer, ThingSpeakFeed};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    info!("Starting guard server");
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    metrics::init_metrics();

    let pool = match make_pool(&config.database_url, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(PgStore::new(pool));

    let backend = match GeminiBackend::new(&config.insight) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to build insight HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let insight = Arc::new(InsightClient::new(
        config.insight.api_keys.clone(),
        Arc::new(backend),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_handle = if config.sync.enabled {
        match ThingSpeakFeed::new(&config.sync) {
            Ok(feed) => {
                let synchronizer =
                    Synchronizer::new(store.clone(), Arc::new(feed), config.sync.device_id.clone());
                Some(tokio::spawn(
                    synchronizer.run(config.sync.interval, shutdown_rx),
                ))
            }
            Err(e) => {
                error!("Feed synchronizer disabled: {}", e);
                None
            }
        }
    } else {
        info!("Feed synchronizer disabled by configuration");
        None
    };

    let state = AppState {
        readings: store.clone(),
        users: store.clone(),
        insight,
        signer: Arc::new(TokenSigner::new(&config.auth)),
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = sync_handle {
        if let Err(e) = handle.await {
            error!("Feed synchronizer task failed: {}", e);
        }
    }
    store.close().await;
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
