//! Session backends
//!
//! A backend is what a session talks to on the far side of the bridge: a
//! local program under a PTY, the same program inside a container, or a
//! remote execution service. The controller only sees the two traits below.

mod container;
mod local;
mod remote;

#[cfg(test)]
mod tests;

pub use container::{ContainerLauncher, ContainerSession};
pub use local::{LocalLauncher, PtyLauncher};
pub use remote::{batch_url, terminal_url, RemoteClient, RemoteSession};

use crate::error::Result;
use crate::protocol::StartDirective;
use crate::reaper::ReapReport;
use crate::transport::{ByteSink, ByteSource};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// The closed set of backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Program under a local PTY
    Pty,
    /// Program in a local container
    Container,
    /// Remote execution service
    Remote,
}

impl BackendKind {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Container => "container",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session acquired, for logs and tests
#[derive(Debug, Clone, Default)]
pub struct WorkerInfo {
    /// Local child pid (also its process group id)
    pub pid: Option<u32>,
    /// Temporary source file
    pub source_path: Option<PathBuf>,
    /// Container name
    pub container: Option<String>,
    /// Remote endpoint
    pub endpoint: Option<String>,
}

/// A running worker owned by one session
#[async_trait]
pub trait SessionBackend: Send {
    /// Which variant this is
    fn kind(&self) -> BackendKind;

    /// Resources held by the worker
    fn worker(&self) -> WorkerInfo;

    /// Borrow the worker's output and input for forwarding
    fn channels(&mut self) -> (Box<dyn ByteSource + '_>, Box<dyn ByteSink + '_>);

    /// Release everything the worker holds, recording each step
    ///
    /// Must be safe to call more than once.
    async fn release(&mut self, report: &mut ReapReport);

    /// Synchronous best-effort teardown for when `release` never ran
    fn abandon(&mut self);
}

/// Creates one worker per accepted start directive
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    /// Variant produced by this launcher
    fn kind(&self) -> BackendKind;

    /// Start a worker for `directive`
    async fn launch(&self, directive: &StartDirective) -> Result<Box<dyn SessionBackend>>;
}
