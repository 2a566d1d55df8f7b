//! Error types for coderun-sandbox

use thiserror::Error;

/// Sandbox error type
#[derive(Debug, Error)]
pub enum Error {
    /// PTY, temp file or container allocation failed
    #[error("resource acquisition failed: {0}")]
    Resource(String),

    /// Child process could not be spawned
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// Remote execution service unreachable or misbehaving
    #[error("remote backend error: {0}")]
    Remote(String),

    /// Caller-facing transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
