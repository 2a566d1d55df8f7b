//! Terminal WebSocket handler
//!
//! Adapts an axum websocket to the caller transport and hands it to the
//! session controller.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use coderun_sandbox::transport::{MessageSink, MessageSource};
use coderun_sandbox::{Error, Result, SessionController, SessionOutcome};

use crate::server::config::AppConfig;

/// Sent instead of a session when the terminal is switched off
pub const TERMINAL_DISABLED: &str = "WebSocket terminal is disabled on this environment.";

/// WebSocket upgrade handler
pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    Extension(controller): Extension<SessionController>,
    Extension(config): Extension<Arc<AppConfig>>,
) -> impl IntoResponse {
    let enabled = config.server.enable_ws_terminal;
    ws.on_upgrade(move |socket| handle_socket(socket, controller, enabled))
}

async fn handle_socket(socket: WebSocket, controller: SessionController, enabled: bool) {
    let (sender, receiver) = socket.split();
    let mut near_rx = WsSource { receiver };
    let mut near_tx = WsSink {
        sender,
        closed: false,
    };

    if !enabled {
        let _ = near_tx.send_text(TERMINAL_DISABLED.to_string()).await;
        let _ = near_tx.close().await;
        return;
    }

    info!("Terminal connection established");
    match controller.serve(&mut near_rx, &mut near_tx).await {
        SessionOutcome::Interactive { end, report } => {
            info!(end = %end, clean = report.is_clean(), "Terminal connection finished");
        }
        outcome => debug!(outcome = ?outcome, "Terminal connection finished"),
    }
}

/// Inbound half of a terminal websocket
struct WsSource {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            match self.receiver.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                // axum answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            }
        }
    }
}

/// Outbound half of a terminal websocket
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sender
            .close()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
