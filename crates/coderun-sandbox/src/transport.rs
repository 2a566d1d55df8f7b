//! Endpoint traits for the two sides of a session
//!
//! The caller-facing side ("near") speaks text messages; the program side
//! ("far") speaks raw bytes. Each side is split into a source and a sink so
//! both directions can be polled at the same time.

use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Inbound text messages from the caller
#[async_trait]
pub trait MessageSource: Send {
    /// Next message; `None` once the caller has gone away
    async fn next_message(&mut self) -> Option<Result<String>>;
}

/// Outbound text messages to the caller
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text message
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the transport; closing twice is harmless
    async fn close(&mut self) -> Result<()>;
}

/// Raw output produced by the far endpoint
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk; `None` on end of stream
    async fn recv(&mut self) -> Option<Result<Vec<u8>>>;
}

/// Raw input consumed by the far endpoint
#[async_trait]
pub trait ByteSink: Send {
    /// Write one chunk
    async fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// In-process caller transport backed by tokio channels
///
/// Useful for embedding the controller without a websocket and for tests.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

/// Sending half of [`ChannelSource`]'s counterpart
pub struct ChannelSink {
    tx: Option<mpsc::Sender<String>>,
}

/// Build a caller transport pair
///
/// Returns `(source, sink, client_tx, client_rx)`: the controller gets the
/// first two, the caller keeps the last two. Dropping `client_tx` is a
/// disconnect.
pub fn channel_transport(
    capacity: usize,
) -> (
    ChannelSource,
    ChannelSink,
    mpsc::Sender<String>,
    mpsc::Receiver<String>,
) {
    let (client_tx, rx) = mpsc::channel(capacity);
    let (tx, client_rx) = mpsc::channel(capacity);
    (
        ChannelSource { rx },
        ChannelSink { tx: Some(tx) },
        client_tx,
        client_rx,
    )
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Transport("transport closed".to_string()))?;
        tx.send(text)
            .await
            .map_err(|_| Error::Transport("caller went away".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}
