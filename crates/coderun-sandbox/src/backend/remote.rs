//! Remote execution service backend
//!
//! Interactive sessions are proxied over a websocket to `<base>/terminal`;
//! batch requests go to `POST <base>/run`.

use super::{BackendKind, BackendLauncher, SessionBackend, WorkerInfo};
use crate::batch::BatchRunner;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::protocol::{BatchRequest, ExecutionResult, StartDirective};
use crate::reaper::{ReapReport, ReapStep, StepOutcome};
use crate::transport::{ByteSink, ByteSource};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Caller-facing text for a failed connection
const CONNECT_FAILED: &str = "connection to execution service failed";

/// Websocket address of the remote terminal endpoint
///
/// `http` becomes `ws`, `https` becomes `wss`, and a base without a scheme is
/// assumed to be `wss`.
#[must_use]
pub fn terminal_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let url = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if base.contains("://") {
        base.to_string()
    } else {
        format!("wss://{}", base)
    };
    format!("{}/terminal", url)
}

/// HTTP address of the remote batch endpoint
///
/// `ws` becomes `http`, `wss` becomes `https`, and a base without a scheme is
/// assumed to be `https`.
#[must_use]
pub fn batch_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let url = if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if base.contains("://") {
        base.to_string()
    } else {
        format!("https://{}", base)
    };
    format!("{}/run", url)
}

/// Client for a remote execution service
///
/// Built once at startup; the HTTP connection pool is shared by all sessions.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base: String,
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteClient {
    /// Create a client for the service at `base`
    pub fn new(base: impl Into<String>, config: RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Remote(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base: base.into(),
            http,
            config,
        })
    }

    /// Open the terminal websocket and send the start message
    async fn open(&self, directive: &StartDirective) -> Result<RemoteSession> {
        let url = terminal_url(&self.base);
        let open_timeout = Duration::from_secs(self.config.open_timeout_secs);

        let ws = match tokio::time::timeout(open_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Execution service connect failed");
                return Err(Error::Remote(CONNECT_FAILED.to_string()));
            }
            Err(_) => {
                warn!(url = %url, timeout_secs = self.config.open_timeout_secs, "Execution service connect timed out");
                return Err(Error::Remote(CONNECT_FAILED.to_string()));
            }
        };

        let (mut sink, stream) = ws.split();
        if let Err(e) = sink.send(Message::Text(directive.to_wire())).await {
            warn!(url = %url, error = %e, "Sending start to execution service failed");
            return Err(Error::Remote(CONNECT_FAILED.to_string()));
        }
        info!(url = %url, "Remote session started");

        Ok(RemoteSession {
            sink: Some(sink),
            stream: Some(stream),
            endpoint: url,
        })
    }
}

#[async_trait]
impl BatchRunner for RemoteClient {
    #[instrument(skip_all, fields(backend = "remote"))]
    async fn run(&self, request: &BatchRequest) -> Result<ExecutionResult> {
        let url = batch_url(&self.base);
        debug!(url = %url, "Calling execution service");

        let response = self.http.post(&url).json(request).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Execution service request failed");
            if e.is_timeout() {
                Error::Remote("execution service timed out".to_string())
            } else {
                Error::Remote(CONNECT_FAILED.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Execution service rejected batch request");
            return Err(Error::Remote(format!(
                "execution service returned {}",
                status.as_u16()
            )));
        }

        response.json::<ExecutionResult>().await.map_err(|e| {
            warn!(url = %url, error = %e, "Execution service sent an unreadable result");
            Error::Remote("execution service sent an invalid result".to_string())
        })
    }
}

#[async_trait]
impl BackendLauncher for RemoteClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn launch(&self, directive: &StartDirective) -> Result<Box<dyn SessionBackend>> {
        Ok(Box::new(self.open(directive).await?))
    }
}

/// A proxied session on a remote execution service
pub struct RemoteSession {
    sink: Option<WsSender>,
    stream: Option<WsReceiver>,
    endpoint: String,
}

struct RemoteSource<'a> {
    stream: Option<&'a mut WsReceiver>,
}

struct RemoteSink<'a> {
    sink: Option<&'a mut WsSender>,
}

#[async_trait]
impl ByteSource for RemoteSource<'_> {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Execution service closed the session");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            }
        }
    }
}

#[async_trait]
impl ByteSink for RemoteSink<'_> {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::Transport("remote session already closed".to_string()))?;
        let text = String::from_utf8_lossy(data).into_owned();
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[async_trait]
impl SessionBackend for RemoteSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn worker(&self) -> WorkerInfo {
        WorkerInfo {
            endpoint: Some(self.endpoint.clone()),
            ..WorkerInfo::default()
        }
    }

    fn channels(&mut self) -> (Box<dyn ByteSource + '_>, Box<dyn ByteSink + '_>) {
        (
            Box::new(RemoteSource {
                stream: self.stream.as_mut(),
            }),
            Box::new(RemoteSink {
                sink: self.sink.as_mut(),
            }),
        )
    }

    async fn release(&mut self, report: &mut ReapReport) {
        self.stream = None;
        let outcome = match self.sink.take() {
            None => StepOutcome::AlreadyGone,
            Some(mut sink) => match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => StepOutcome::Done,
                // The peer hung up first
                Ok(Err(e)) => {
                    debug!(error = %e, "Remote close after peer hangup");
                    StepOutcome::AlreadyGone
                }
                Err(_) => StepOutcome::Failed("close handshake timed out".to_string()),
            },
        };
        report.record(ReapStep::CloseRemote, outcome);
    }

    fn abandon(&mut self) {
        self.sink = None;
        self.stream = None;
    }
}
