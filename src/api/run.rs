//! Batch execution endpoint
//!
//! `POST /run` takes `{code, stdin}` and answers `{stdout, stderr, success,
//! error}`, so one coderun instance can act as another's execution service.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use coderun_sandbox::{BatchRequest, Error, ExecutionResult, SessionController};
use serde_json::json;
use tracing::warn;

/// Failure to run the request at all
#[derive(Debug)]
pub struct RunError(Error);

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::Remote(message) => (StatusCode::BAD_GATEWAY, message.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "execution failed".to_string(),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

async fn run_code(
    Extension(controller): Extension<SessionController>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<ExecutionResult>, RunError> {
    controller.run_batch(&request).await.map(Json).map_err(|e| {
        warn!(error = %e, "Batch request failed");
        RunError(e)
    })
}

/// Create run routes
pub fn run_routes() -> Router {
    Router::new().route("/run", post(run_code))
}
