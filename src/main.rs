//! prolific-watcher server entry point.
//!
//! Opens the SQLite store, wires the service, and starts the Axum server
//! with REST, WebSocket, and SSE endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use prolific_watcher::api;
use prolific_watcher::app_state::AppState;
use prolific_watcher::config::WatcherConfig;
use prolific_watcher::domain::EventHub;
use prolific_watcher::persistence::{
    HeadersStore, RefreshStateStore, StudiesStore, SubmissionsStore, TokenStore, sqlite,
};
use prolific_watcher::service::WatcherService;
use prolific_watcher::upstream::UpstreamClient;
use prolific_watcher::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = WatcherConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(addr = %config.listen_addr, sqlite = %config.sqlite_path, "starting prolific-watcher");

    // Open storage
    let pool = sqlite::connect(&config.sqlite_path).await?;

    // Build domain + service layer
    let event_hub = EventHub::new(config.event_mailbox_capacity);
    let upstream = UpstreamClient::new(
        reqwest::Client::builder().build()?,
        Duration::from_secs(config.upstream_timeout_secs),
    );
    let service = Arc::new(WatcherService::new(
        TokenStore::new(pool.clone()),
        HeadersStore::new(pool.clone()),
        RefreshStateStore::new(pool.clone()),
        StudiesStore::new(pool.clone()),
        SubmissionsStore::new(pool),
        event_hub.clone(),
        upstream,
    ));

    // Build application state
    let app_state = AppState {
        service,
        event_hub,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
