//! PTY-backed interactive session

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::reaper::{self, ReapReport, ReapStep, StepOutcome};
use crate::transport::{ByteSink, ByteSource};
use async_trait::async_trait;
use pty_process::{OwnedReadPty, OwnedWritePty};
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, info};

const READ_CHUNK: usize = 4096;

/// A child process attached to the slave end of a fresh PTY
pub struct PtySession {
    reader: Option<OwnedReadPty>,
    writer: Option<OwnedWritePty>,
    child: Child,
    pid: Option<u32>,
    exited: bool,
    source: Option<TempPath>,
    kill_grace: Duration,
    drain_grace: Duration,
}

impl PtySession {
    /// Spawn `program args..` under a new PTY
    ///
    /// The child becomes a session leader with the PTY as its controlling
    /// terminal, so its process group id equals its pid. `source` is owned by
    /// the session from here on and deleted on release.
    pub async fn spawn(
        program: &str,
        args: &[String],
        execution: &ExecutionConfig,
        source: TempPath,
        stdin_seed: &str,
    ) -> Result<Self> {
        let (pty, pts) = pty_process::open()
            .map_err(|e| Error::Resource(format!("failed to open PTY: {}", e)))?;

        let mut cmd = pty_process::Command::new(program).args(args).env_clear();
        for (key, value) in execution.child_env() {
            cmd = cmd.env(key, value);
        }
        cmd = cmd.env("TERM", &execution.term);

        // `spawn` consumes the slave, closing it in this process
        let child = cmd
            .spawn(pts)
            .map_err(|e| Error::Spawn(format!("{}: {}", program, e)))?;
        let pid = child.id();
        info!(pid = ?pid, program = %program, "PTY session started");

        let (reader, writer) = pty.into_split();
        let mut session = Self {
            reader: Some(reader),
            writer: Some(writer),
            child,
            pid,
            exited: false,
            source: Some(source),
            kill_grace: execution.kill_grace(),
            drain_grace: execution.drain_grace(),
        };

        if !stdin_seed.is_empty() {
            let mut seed = stdin_seed.to_string();
            if !seed.ends_with('\n') {
                seed.push('\n');
            }
            if let Some(writer) = session.writer.as_mut() {
                let seeded = match writer.write_all(seed.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = seeded {
                    session.abandon();
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(session)
    }

    /// Process id of the child, which is also its process group id
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Path of the temporary source file while it exists
    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Output and input halves, borrowed for the duration of forwarding
    pub fn channels(&mut self) -> (PtySource<'_>, PtySink<'_>) {
        (
            PtySource {
                reader: self.reader.as_mut(),
                child: &mut self.child,
                exited: &mut self.exited,
                drain_grace: self.drain_grace,
                drain_deadline: None,
            },
            PtySink {
                writer: self.writer.as_mut(),
            },
        )
    }

    /// Close the master, terminate the process group, delete the source
    pub async fn release(&mut self, report: &mut ReapReport) {
        let had_terminal = self.reader.take().is_some() | self.writer.take().is_some();
        report.record(
            ReapStep::CloseTerminal,
            if had_terminal {
                StepOutcome::Done
            } else {
                StepOutcome::AlreadyGone
            },
        );

        let pid = self.pid.take();
        let outcome = reaper::terminate_process_group(&mut self.child, pid, self.kill_grace).await;
        report.record(ReapStep::TerminateProcessGroup, outcome);

        report.record(
            ReapStep::RemoveSourceFile,
            reaper::remove_source_file(&mut self.source),
        );
    }

    /// Synchronous last resort when the session is dropped unreleased
    pub fn abandon(&mut self) {
        reaper::kill_process_group_now(self.pid.take());
        self.reader = None;
        self.writer = None;
        // Dropping the TempPath deletes the file
        self.source = None;
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.pid.is_some() {
            debug!(pid = ?self.pid, "PTY session dropped unreleased");
            self.abandon();
        }
    }
}

fn is_eio(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

/// Output half of a [`PtySession`]
pub struct PtySource<'a> {
    reader: Option<&'a mut OwnedReadPty>,
    child: &'a mut Child,
    exited: &'a mut bool,
    drain_grace: Duration,
    drain_deadline: Option<Instant>,
}

fn read_outcome(read: std::io::Result<usize>, buf: &[u8]) -> Option<Result<Vec<u8>>> {
    match read {
        Ok(0) => None,
        Ok(n) => Some(Ok(buf[..n].to_vec())),
        // The slave side is gone
        Err(e) if is_eio(&e) => None,
        Err(e) => Some(Err(Error::Io(e))),
    }
}

#[async_trait]
impl ByteSource for PtySource<'_> {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        let reader = self.reader.as_mut()?;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            if *self.exited {
                let grace = self.drain_grace;
                let deadline = *self
                    .drain_deadline
                    .get_or_insert_with(|| Instant::now() + grace);
                return match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
                    Ok(read) => read_outcome(read, &buf),
                    Err(_) => None,
                };
            }

            tokio::select! {
                read = reader.read(&mut buf) => return read_outcome(read, &buf),
                status = self.child.wait() => {
                    debug!(status = ?status.ok(), "PTY child exited, draining output");
                    *self.exited = true;
                }
            }
        }
    }
}

/// Input half of a [`PtySession`]
pub struct PtySink<'a> {
    writer: Option<&'a mut OwnedWritePty>,
}

#[async_trait]
impl ByteSink for PtySink<'_> {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Transport("terminal already closed".to_string()))?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}
