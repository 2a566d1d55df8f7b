//! WebSocket module for Coderun
//!
//! - /terminal - Interactive or batch execution session
//! - /ws/terminal - Same endpoint under the legacy path

pub mod terminal;

pub use terminal::terminal_handler;

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new()
        .route("/terminal", get(terminal_handler))
        .route("/ws/terminal", get(terminal_handler))
}
