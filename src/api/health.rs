//! Health check endpoints

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

const SERVICE: &str = "coderun";

/// Root liveness response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        service: SERVICE,
    })
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
