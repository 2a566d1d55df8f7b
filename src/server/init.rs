//! Server initialization
//!
//! Contains the main `run()` function that builds the session controller and
//! serves HTTP and websocket routes until shutdown.

use super::config::AppConfig;
use super::loader::load_config;
use super::shutdown::wait_for_shutdown_signal;
use crate::{api, websocket};
use anyhow::{Context, Result};
use axum::{Extension, Router};
use coderun_sandbox::SessionController;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full router around a ready controller
pub fn build_router(controller: SessionController, config: Arc<AppConfig>) -> Router {
    Router::new()
        .merge(api::api_router())
        .merge(websocket::websocket_router())
        .layer(Extension(controller))
        .layer(Extension(config))
        .layer(TraceLayer::new_for_http())
}

/// Run the server
pub async fn run() -> Result<()> {
    let config = load_config()?;
    info!(
        backend = ?config.sandbox.backend,
        remote = config.sandbox.remote_endpoint().unwrap_or("-"),
        ws_terminal = config.server.enable_ws_terminal,
        "Configuration loaded"
    );

    let controller = SessionController::from_config(&config.sandbox)
        .await
        .context("Failed to initialize session controller")?;
    info!(backend = %controller.backend_kind(), "Session controller ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = build_router(controller, Arc::new(config));

    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Coderun shutdown complete");
    Ok(())
}
