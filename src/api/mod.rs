//! REST API for Coderun
//!
//! - `/`, `/health`: liveness
//! - `/api/config`: effective execution limits
//! - `/run`: one batch execution

pub mod health;
pub mod limits;
pub mod run;

pub use health::health_routes;
pub use limits::limits_routes;
pub use run::run_routes;

use axum::Router;

/// Create the API router
pub fn api_router() -> Router {
    Router::new()
        .merge(health_routes())
        .merge(limits_routes())
        .merge(run_routes())
}
