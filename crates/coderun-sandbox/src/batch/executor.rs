//! Local batch executor

use super::BatchRunner;
use crate::config::ExecutionConfig;
use crate::container::{self, ContainerConfig};
use crate::error::{Error, Result};
use crate::protocol::{BatchRequest, ExecutionResult};
use crate::reaper::{self, StepOutcome};
use crate::source::write_source;
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Where a batch program runs
#[derive(Debug, Clone)]
enum Isolation {
    Process,
    Container(ContainerConfig),
}

/// Runs programs locally with a wall-clock deadline
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    execution: ExecutionConfig,
    isolation: Isolation,
}

impl BatchExecutor {
    /// Executor running programs as direct child processes
    #[must_use]
    pub fn new(execution: ExecutionConfig) -> Self {
        Self {
            execution,
            isolation: Isolation::Process,
        }
    }

    /// Run every program inside a container instead
    #[must_use]
    pub fn with_container(mut self, config: ContainerConfig) -> Self {
        self.isolation = Isolation::Container(config);
        self
    }

    fn command_for(&self, source: &std::path::Path) -> (String, Vec<String>, Option<String>) {
        match &self.isolation {
            Isolation::Process => (
                self.execution.interpreter.clone(),
                self.execution.command_args(&source.display().to_string()),
                None,
            ),
            Isolation::Container(config) => {
                let name = container::container_name();
                let args = container::run_args(&name, config, &self.execution, source, false);
                ("docker".to_string(), args, Some(name))
            }
        }
    }
}

/// One output stream, kept up to the byte cap
struct Captured {
    bytes: Vec<u8>,
    total: u64,
}

impl Captured {
    fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.total > self.bytes.len() as u64 {
            text.push_str(&format!("\n[truncated: {} total bytes]", self.total));
        }
        text
    }
}

/// Read up to `cap` bytes, then discard the rest so the writer never blocks
async fn read_stream<R: AsyncRead + Unpin>(reader: R, cap: usize) -> std::io::Result<Captured> {
    let mut bytes = Vec::new();
    let mut limited = reader.take(cap as u64);
    limited.read_to_end(&mut bytes).await?;
    let discarded = tokio::io::copy(&mut limited.into_inner(), &mut tokio::io::sink()).await?;
    Ok(Captured {
        total: bytes.len() as u64 + discarded,
        bytes,
    })
}

type Reader = Option<JoinHandle<std::io::Result<Captured>>>;

/// Collect a reader task, giving up after `grace`
async fn collect(reader: Reader, grace: Duration) -> Option<String> {
    let handle = reader?;
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(Ok(captured))) => Some(captured.into_text()),
        Ok(Ok(Err(e))) => {
            debug!(error = %e, "Output stream read failed");
            None
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader task failed");
            None
        }
        Err(_) => {
            abort.abort();
            debug!("Output stream still open after drain grace");
            None
        }
    }
}

fn classify(status: ExitStatus, stdout: Option<String>, stderr: Option<String>) -> ExecutionResult {
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        return ExecutionResult::crash();
    };
    if status.success() {
        return ExecutionResult::completed(stdout, stderr);
    }
    match status.code() {
        Some(code) => {
            let error = if stderr.trim().is_empty() {
                format!("Process exited with code {}", code)
            } else {
                stderr.clone()
            };
            ExecutionResult::failed(stdout, stderr, error)
        }
        // Terminated by a signal
        None => ExecutionResult::crash(),
    }
}

#[async_trait]
impl BatchRunner for BatchExecutor {
    #[instrument(skip_all, fields(timeout_secs = self.execution.batch_timeout_secs))]
    async fn run(&self, request: &BatchRequest) -> Result<ExecutionResult> {
        let source = write_source(&request.code, &self.execution.source_suffix)?;
        let source_path = source.to_path_buf();
        let mut source = Some(source);

        let (program, args, container) = self.command_for(&source_path);

        let spawned = Command::new(&program)
            .args(&args)
            .env_clear()
            .envs(self.execution.child_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                reaper::remove_source_file(&mut source);
                return Err(Error::Spawn(format!("{}: {}", program, e)));
            }
        };
        let pid = child.id();
        debug!(pid = ?pid, container = ?container, "Batch worker started");

        if let Some(mut stdin) = child.stdin.take() {
            let data = request.normalized_stdin();
            tokio::spawn(async move {
                if !data.is_empty() {
                    if let Err(e) = stdin.write_all(data.as_bytes()).await {
                        debug!(error = %e, "Program stopped reading stdin");
                    }
                }
                let _ = stdin.shutdown().await;
            });
        }
        let cap = self.execution.max_output_bytes;
        let stdout: Reader = child.stdout.take().map(|s| tokio::spawn(read_stream(s, cap)));
        let stderr: Reader = child.stderr.take().map(|s| tokio::spawn(read_stream(s, cap)));

        let deadline = self.execution.batch_timeout();
        let drain = self.execution.drain_grace();

        let (result, abnormal) = match tokio::time::timeout(deadline, child.wait()).await {
            Err(_) => {
                info!(pid = ?pid, "Batch run exceeded its deadline");
                if let Some(pid) = pid {
                    if let Err(e) = reaper::signal_process_group(pid, Signal::SIGKILL) {
                        warn!(pid, error = %e, "SIGKILL to batch group failed");
                    }
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(handle) = stdout {
                    handle.abort();
                }
                if let Some(handle) = stderr {
                    handle.abort();
                }
                (ExecutionResult::timeout(), true)
            }
            Ok(Err(e)) => {
                warn!(pid = ?pid, error = %e, "Waiting on batch worker failed");
                if let Some(pid) = pid {
                    let _ = reaper::signal_process_group(pid, Signal::SIGKILL);
                }
                let _ = child.start_kill();
                (ExecutionResult::crash(), true)
            }
            Ok(Ok(status)) => {
                // Background children of the program must not outlive it
                if let Some(pid) = pid {
                    let _ = reaper::signal_process_group(pid, Signal::SIGKILL);
                }
                let stdout = collect(stdout, drain).await;
                let stderr = collect(stderr, drain).await;
                (classify(status, stdout, stderr), false)
            }
        };

        // `--rm` covers a normal exit; a killed CLI leaves the container behind
        if let Some(name) = container.as_ref().filter(|_| abnormal) {
            match container::remove_container(name).await {
                Ok(true) => debug!(container = %name, "Batch container removed"),
                Ok(false) => {}
                Err(e) => warn!(container = %name, error = %e, "Batch container removal failed"),
            }
        }
        if let StepOutcome::Failed(reason) = reaper::remove_source_file(&mut source) {
            warn!(reason = %reason, "Batch source file not removed");
        }

        debug!(success = result.success, error = %result.error, "Batch run finished");
        Ok(result)
    }
}
