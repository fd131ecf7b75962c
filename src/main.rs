// Main entry point - Configuration, wiring and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::relay_service::RelayService;
use crate::infrastructure::config::load_relay_config;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{health_check, relay_socket};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_relay_config()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create the relay (application layer) and its timers
    let relay = RelayService::new(&config);
    let tasks = relay.spawn_background_tasks();

    let state = Arc::new(AppState { relay });

    // Build router (presentation layer); dashboards connect at `/`, devices at either path
    let router = Router::new()
        .route("/", get(relay_socket))
        .route("/ws", get(relay_socket))
        .route("/healthz", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(
        "Telemetry relay listening on {} (demo mode {}, energy model {:?})",
        addr,
        if config.demo.enabled { "enabled" } else { "disabled" },
        config.energy.model
    );

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tasks.shutdown();
    tracing::info!("Telemetry relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
