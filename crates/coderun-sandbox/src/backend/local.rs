//! Local backends: direct PTY and backend selection

use super::container::ContainerLauncher;
use super::{BackendKind, BackendLauncher, SessionBackend, WorkerInfo};
use crate::batch::BatchExecutor;
use crate::config::{BackendPreference, ExecutionConfig, SandboxConfig};
use crate::container::ContainerRuntime;
use crate::error::Result;
use crate::protocol::StartDirective;
use crate::pty::PtySession;
use crate::reaper::ReapReport;
use crate::source::write_source;
use crate::transport::{ByteSink, ByteSource};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

/// Runs the program directly under a PTY on this host
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    execution: ExecutionConfig,
}

impl PtyLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new(execution: ExecutionConfig) -> Self {
        Self { execution }
    }
}

#[async_trait]
impl BackendLauncher for PtyLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    #[instrument(skip_all, fields(backend = "pty"))]
    async fn launch(&self, directive: &StartDirective) -> Result<Box<dyn SessionBackend>> {
        let source = write_source(&directive.code, &self.execution.source_suffix)?;
        let args = self.execution.command_args(&source.display().to_string());
        let session = PtySession::spawn(
            &self.execution.interpreter,
            &args,
            &self.execution,
            source,
            &directive.stdin_seed,
        )
        .await?;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl SessionBackend for PtySession {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    fn worker(&self) -> WorkerInfo {
        WorkerInfo {
            pid: self.pid(),
            source_path: self.source_path().map(|p| p.to_path_buf()),
            ..WorkerInfo::default()
        }
    }

    fn channels(&mut self) -> (Box<dyn ByteSource + '_>, Box<dyn ByteSink + '_>) {
        let (source, sink) = PtySession::channels(self);
        (Box::new(source), Box::new(sink))
    }

    async fn release(&mut self, report: &mut ReapReport) {
        PtySession::release(self, report).await;
    }

    fn abandon(&mut self) {
        PtySession::abandon(self);
    }
}

/// Local backend chosen from the deployment's preference
pub enum LocalLauncher {
    /// Direct PTY
    Pty(PtyLauncher),
    /// Container under a PTY
    Container(ContainerLauncher),
}

impl LocalLauncher {
    /// Decide which local backend serves sessions
    ///
    /// `auto` checks the container runtime once and falls back to the direct
    /// PTY backend when it does not answer.
    pub async fn resolve(preference: BackendPreference) -> BackendKind {
        match preference {
            BackendPreference::Pty => BackendKind::Pty,
            BackendPreference::Container => BackendKind::Container,
            BackendPreference::Auto => {
                let runtime = ContainerRuntime::detect().await;
                if runtime.is_available() {
                    BackendKind::Container
                } else {
                    warn!("Container runtime unavailable, falling back to direct PTY");
                    BackendKind::Pty
                }
            }
        }
    }

    /// Build the launcher for an already resolved kind
    ///
    /// `Remote` is not a local backend and maps to the direct PTY.
    #[must_use]
    pub fn new(kind: BackendKind, config: &SandboxConfig) -> Self {
        let launcher = match kind {
            BackendKind::Container => Self::Container(ContainerLauncher::new(
                config.execution.clone(),
                config.container.clone(),
            )),
            BackendKind::Pty | BackendKind::Remote => {
                Self::Pty(PtyLauncher::new(config.execution.clone()))
            }
        };
        info!(backend = %launcher.kind(), "Local backend selected");
        launcher
    }

    /// Resolve the preference and build the launcher
    pub async fn from_config(config: &SandboxConfig) -> Self {
        let kind = Self::resolve(config.backend).await;
        Self::new(kind, config)
    }

    /// Batch executor matching this backend's isolation
    #[must_use]
    pub fn batch_executor(&self, config: &SandboxConfig) -> BatchExecutor {
        let executor = BatchExecutor::new(config.execution.clone());
        match self {
            Self::Pty(_) => executor,
            Self::Container(_) => executor.with_container(config.container.clone()),
        }
    }
}

#[async_trait]
impl BackendLauncher for LocalLauncher {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Pty(launcher) => launcher.kind(),
            Self::Container(launcher) => launcher.kind(),
        }
    }

    async fn launch(&self, directive: &StartDirective) -> Result<Box<dyn SessionBackend>> {
        match self {
            Self::Pty(launcher) => launcher.launch(directive).await,
            Self::Container(launcher) => launcher.launch(directive).await,
        }
    }
}
