//! Batch execution
//!
//! One program, run to completion with captured output and a wall-clock
//! deadline. No live input channel.

mod executor;


pub use executor::BatchExecutor;

use crate::error::Result;
use crate::protocol::{BatchRequest, ExecutionResult};
use async_trait::async_trait;

/// Anything that can turn a batch request into a result
///
/// Implemented locally by [`BatchExecutor`] and remotely by
/// [`crate::backend::RemoteClient`].
#[async_trait]
pub trait BatchRunner: Send + Sync {
    /// Run one request
    ///
    /// Execution failures and timeouts are part of the returned
    /// [`ExecutionResult`]; `Err` is reserved for infrastructure problems.
    async fn run(&self, request: &BatchRequest) -> Result<ExecutionResult>;
}
