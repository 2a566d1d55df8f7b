//! Session Controller
//!
//! Owns a caller connection from accept to close:
//! 1. read exactly one start message within the handshake window
//! 2. batch requests go to the [`BatchRunner`], their output is forwarded
//! 3. interactive requests get one worker from the [`BackendLauncher`],
//!    bridged until either side ends, then reaped unconditionally


use crate::backend::{BackendKind, BackendLauncher, LocalLauncher, RemoteClient};
use crate::batch::BatchRunner;
use crate::bridge::BridgeEnd;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::protocol::{error_line, BatchRequest, ExecutionResult, ProtocolError, StartDirective};
use crate::reaper::ReapReport;
use crate::session::Session;
use crate::transport::{MessageSink, MessageSource};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// How a served connection ended
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The caller left before sending a start message
    Disconnected,
    /// The start message was rejected; nothing was launched
    Rejected(ProtocolError),
    /// A batch run completed, or `None` when it could not be run
    Batch(Option<ExecutionResult>),
    /// The worker could not be started
    LaunchFailed,
    /// An interactive session ran and was reaped
    Interactive {
        /// Why forwarding stopped
        end: BridgeEnd,
        /// Teardown record
        report: ReapReport,
    },
}

/// Accepts connections and drives them to completion
///
/// Built once at startup and shared by every connection.
#[derive(Clone)]
pub struct SessionController {
    launcher: Arc<dyn BackendLauncher>,
    batch: Arc<dyn BatchRunner>,
    handshake_timeout: Duration,
}

impl SessionController {
    /// Controller over explicit collaborators
    #[must_use]
    pub fn new(
        launcher: Arc<dyn BackendLauncher>,
        batch: Arc<dyn BatchRunner>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            batch,
            handshake_timeout,
        }
    }

    /// Build the controller for a deployment
    ///
    /// A configured remote endpoint selects proxy mode; otherwise the local
    /// backend preference is resolved once here.
    pub async fn from_config(config: &SandboxConfig) -> Result<Self> {
        if let Some(base) = config.remote_endpoint() {
            let client = Arc::new(RemoteClient::new(base, config.remote.clone())?);
            info!(endpoint = %base, "Proxy mode: sessions run on the execution service");
            let launcher: Arc<dyn BackendLauncher> = client.clone();
            return Ok(Self::new(launcher, client, config.handshake_timeout()));
        }

        let local = LocalLauncher::from_config(config).await;
        let batch = Arc::new(local.batch_executor(config));
        Ok(Self::new(Arc::new(local), batch, config.handshake_timeout()))
    }

    /// Backend variant serving interactive sessions
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.launcher.kind()
    }

    /// Run one batch request outside of a connection
    pub async fn run_batch(&self, request: &BatchRequest) -> Result<ExecutionResult> {
        self.batch.run(request).await
    }

    /// Serve one caller connection until it is done
    ///
    /// The transport is closed before returning on every path.
    #[instrument(skip_all, fields(backend = %self.launcher.kind()))]
    pub async fn serve(
        &self,
        near_rx: &mut dyn MessageSource,
        near_tx: &mut dyn MessageSink,
    ) -> SessionOutcome {
        let outcome = match self.handshake(near_rx).await {
            Err(Some(rejection)) => {
                debug!(reason = %rejection, "Start message rejected");
                send_line(near_tx, rejection.to_line()).await;
                SessionOutcome::Rejected(rejection)
            }
            Err(None) => SessionOutcome::Disconnected,
            Ok(directive) if !directive.interactive => {
                SessionOutcome::Batch(self.serve_batch(&directive, near_tx).await)
            }
            Ok(directive) => self.serve_interactive(&directive, near_rx, near_tx).await,
        };

        if let Err(e) = near_tx.close().await {
            debug!(error = %e, "Closing caller transport failed");
        }
        outcome
    }

    /// `Err(None)` means the caller went away silently
    async fn handshake(
        &self,
        near_rx: &mut dyn MessageSource,
    ) -> std::result::Result<StartDirective, Option<ProtocolError>> {
        let first = tokio::time::timeout(self.handshake_timeout, near_rx.next_message())
            .await
            .map_err(|_| Some(ProtocolError::HandshakeTimeout))?;

        match first {
            None => Err(None),
            Some(Err(e)) => {
                debug!(error = %e, "Caller transport failed before start");
                Err(None)
            }
            Some(Ok(text)) => StartDirective::from_handshake(&text).map_err(Some),
        }
    }

    async fn serve_batch(
        &self,
        directive: &StartDirective,
        near_tx: &mut dyn MessageSink,
    ) -> Option<ExecutionResult> {
        let request = directive.to_batch_request();
        match self.batch.run(&request).await {
            Ok(result) => {
                for event in result.output_events() {
                    if let Err(e) = near_tx.send_text(event).await {
                        debug!(error = %e, "Caller left during batch output");
                        break;
                    }
                }
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "Batch run failed");
                send_line(near_tx, caller_error(&e, "execution failed")).await;
                None
            }
        }
    }

    async fn serve_interactive(
        &self,
        directive: &StartDirective,
        near_rx: &mut dyn MessageSource,
        near_tx: &mut dyn MessageSink,
    ) -> SessionOutcome {
        let backend = match self.launcher.launch(directive).await {
            Ok(backend) => backend,
            Err(e) => {
                error!(error = %e, "Could not start session worker");
                send_line(near_tx, caller_error(&e, "failed to start session")).await;
                return SessionOutcome::LaunchFailed;
            }
        };

        let mut session = Session::new(backend);
        let worker = session.worker();
        info!(
            session_id = %session.id(),
            backend = %session.kind(),
            pid = ?worker.pid,
            container = ?worker.container,
            "Session started"
        );

        let bridged = AssertUnwindSafe(session.bridge(near_rx, near_tx))
            .catch_unwind()
            .await;
        let report = session.reap().await;

        let end = match bridged {
            Ok(end) => end,
            Err(_) => {
                error!(session_id = %session.id(), "Forwarding panicked");
                BridgeEnd::FarError
            }
        };
        info!(session_id = %session.id(), end = %end, "Session ended");

        if end == BridgeEnd::ProtocolViolation {
            send_line(near_tx, ProtocolError::AlreadyStarted.to_line()).await;
        }
        SessionOutcome::Interactive { end, report }
    }
}

/// Caller-safe error line; remote errors are already phrased for the caller
fn caller_error(e: &Error, fallback: &str) -> String {
    match e {
        Error::Remote(message) => error_line(message),
        _ => error_line(fallback),
    }
}

async fn send_line(near_tx: &mut dyn MessageSink, line: String) {
    if let Err(e) = near_tx.send_text(line).await {
        debug!(error = %e, "Could not deliver error line");
    }
}
