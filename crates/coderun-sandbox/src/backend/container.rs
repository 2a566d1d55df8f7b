//! Container backend: `docker run -it` under a PTY

use super::{BackendKind, BackendLauncher, SessionBackend, WorkerInfo};
use crate::config::ExecutionConfig;
use crate::container::{self, ContainerConfig};
use crate::error::Result;
use crate::protocol::StartDirective;
use crate::pty::PtySession;
use crate::reaper::{ReapReport, ReapStep, StepOutcome};
use crate::source::write_source;
use crate::transport::{ByteSink, ByteSource};
use async_trait::async_trait;
use tracing::{info, instrument};

/// Starts one throwaway container per session
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    execution: ExecutionConfig,
    config: ContainerConfig,
}

impl ContainerLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new(execution: ExecutionConfig, config: ContainerConfig) -> Self {
        Self { execution, config }
    }
}

#[async_trait]
impl BackendLauncher for ContainerLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    #[instrument(skip_all, fields(backend = "container", image = %self.config.image))]
    async fn launch(&self, directive: &StartDirective) -> Result<Box<dyn SessionBackend>> {
        let source = write_source(&directive.code, &self.execution.source_suffix)?;
        let name = container::container_name();
        let args = container::run_args(&name, &self.config, &self.execution, &source, true);

        let pty = PtySession::spawn(
            "docker",
            &args,
            &self.execution,
            source,
            &directive.stdin_seed,
        )
        .await?;
        info!(container = %name, "Container session started");

        Ok(Box::new(ContainerSession {
            pty,
            name,
            removed: false,
        }))
    }
}

/// The docker CLI under a PTY plus the container it started
pub struct ContainerSession {
    pty: PtySession,
    name: String,
    removed: bool,
}

#[async_trait]
impl SessionBackend for ContainerSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn worker(&self) -> WorkerInfo {
        WorkerInfo {
            pid: self.pty.pid(),
            source_path: self.pty.source_path().map(|p| p.to_path_buf()),
            container: Some(self.name.clone()),
            endpoint: None,
        }
    }

    fn channels(&mut self) -> (Box<dyn ByteSource + '_>, Box<dyn ByteSink + '_>) {
        let (source, sink) = self.pty.channels();
        (Box::new(source), Box::new(sink))
    }

    async fn release(&mut self, report: &mut ReapReport) {
        self.pty.release(report).await;

        let outcome = if self.removed {
            StepOutcome::AlreadyGone
        } else {
            match container::remove_container(&self.name).await {
                Ok(true) => StepOutcome::Done,
                Ok(false) => StepOutcome::AlreadyGone,
                Err(e) => StepOutcome::Failed(e.to_string()),
            }
        };
        if !matches!(outcome, StepOutcome::Failed(_)) {
            self.removed = true;
        }
        report.record(ReapStep::RemoveContainer, outcome);
    }

    fn abandon(&mut self) {
        self.pty.abandon();
        if !self.removed {
            container::remove_container_detached(&self.name);
            self.removed = true;
        }
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        if !self.removed {
            self.abandon();
        }
    }
}
