//! Effective execution limits, for clients that display them

use crate::server::config::AppConfig;
use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use coderun_sandbox::SessionController;
use serde::Serialize;
use std::sync::Arc;

/// Limits applied to every run
#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub cpu_limit_percent: u32,
    pub memory_limit_mb: u64,
    pub timeout_seconds: u64,
    pub network_access: bool,
    pub allowed_libraries: Vec<String>,
    pub backend: String,
    pub enable_ws_terminal: bool,
}

impl LimitsResponse {
    fn new(config: &AppConfig, controller: &SessionController) -> Self {
        let container = &config.sandbox.container;
        Self {
            cpu_limit_percent: container.limits.cpu_percent,
            memory_limit_mb: container.limits.memory_mb(),
            timeout_seconds: config.sandbox.execution.batch_timeout_secs,
            network_access: container.network.allows_network(),
            allowed_libraries: config.sandbox.execution.allowed_libraries.clone(),
            backend: controller.backend_kind().to_string(),
            enable_ws_terminal: config.server.enable_ws_terminal,
        }
    }
}

async fn get_limits(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(controller): Extension<SessionController>,
) -> Json<LimitsResponse> {
    Json(LimitsResponse::new(&config, &controller))
}

/// Create limits routes
pub fn limits_routes() -> Router {
    Router::new().route("/api/config", get(get_limits))
}
