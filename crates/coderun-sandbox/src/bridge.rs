//! Stream Bridge
//!
//! Relays a session in both directions until either side finishes:
//!
//! - near → far: caller messages are classified; typed input is unwrapped,
//!   anything else is written verbatim, a second start ends the bridge.
//! - far → near: raw bytes are decoded as UTF-8 and sent as text.
//!
//! Whichever loop ends first wins and the other is dropped mid-await. Both
//! loops only borrow their endpoints, so the owner can tear them down after.

use crate::protocol::ClientMessage;
use crate::transport::{ByteSink, ByteSource, MessageSink, MessageSource};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a bridge stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The caller went away
    NearClosed,
    /// The program or remote side reached end of stream
    FarClosed,
    /// Reading from or writing to the caller failed
    NearError,
    /// Reading from or writing to the far side failed
    FarError,
    /// The session's cancellation token fired
    Cancelled,
    /// The caller sent a second start directive
    ProtocolViolation,
}

impl fmt::Display for BridgeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NearClosed => "caller closed",
            Self::FarClosed => "program finished",
            Self::NearError => "caller transport error",
            Self::FarError => "program stream error",
            Self::Cancelled => "cancelled",
            Self::ProtocolViolation => "protocol violation",
        };
        f.write_str(reason)
    }
}

/// Incremental UTF-8 decoder
///
/// A multi-byte sequence split across chunks is held back until the rest
/// arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `chunk` as possible
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut input: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&input[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &input[valid + len..];
                        }
                        // Truncated sequence at the end; wait for more
                        None => {
                            input = &input[valid..];
                            break;
                        }
                    }
                }
            }
        }

        let rest = input.to_vec();
        self.pending = rest;
        out
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

async fn near_to_far(near_rx: &mut dyn MessageSource, far_tx: &mut dyn ByteSink) -> BridgeEnd {
    loop {
        let text = match near_rx.next_message().await {
            None => return BridgeEnd::NearClosed,
            Some(Err(e)) => {
                debug!(error = %e, "Caller read failed");
                return BridgeEnd::NearError;
            }
            Some(Ok(text)) => text,
        };

        let message = ClientMessage::parse(&text);
        let payload = match &message {
            ClientMessage::Start(_) => return BridgeEnd::ProtocolViolation,
            ClientMessage::Input(_) | ClientMessage::Legacy(_) => message.payload(),
        };
        let Some(payload) = payload else {
            continue;
        };
        if let Err(e) = far_tx.send(payload).await {
            debug!(error = %e, "Write to program failed");
            return BridgeEnd::FarError;
        }
    }
}

async fn far_to_near(far_rx: &mut dyn ByteSource, near_tx: &mut dyn MessageSink) -> BridgeEnd {
    let mut decoder = Utf8Decoder::default();
    loop {
        match far_rx.recv().await {
            None => {
                let tail = decoder.finish();
                if !tail.is_empty() && near_tx.send_text(tail).await.is_err() {
                    return BridgeEnd::NearError;
                }
                return BridgeEnd::FarClosed;
            }
            Some(Err(e)) => {
                debug!(error = %e, "Program read failed");
                return BridgeEnd::FarError;
            }
            Some(Ok(chunk)) => {
                let text = decoder.decode(&chunk);
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = near_tx.send_text(text).await {
                    debug!(error = %e, "Caller write failed");
                    return BridgeEnd::NearError;
                }
            }
        }
    }
}

/// Forward between the caller (`near_*`) and the worker (`far_*`)
///
/// Returns as soon as either direction ends or `cancel` fires.
pub async fn run(
    near_rx: &mut dyn MessageSource,
    near_tx: &mut dyn MessageSink,
    far_rx: &mut dyn ByteSource,
    far_tx: &mut dyn ByteSink,
    cancel: &CancellationToken,
) -> BridgeEnd {
    let end = tokio::select! {
        biased;
        _ = cancel.cancelled() => BridgeEnd::Cancelled,
        end = far_to_near(far_rx, near_tx) => end,
        end = near_to_far(near_rx, far_tx) => end,
    };
    debug!(end = %end, "Bridge finished");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::transport::channel_transport;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FarRx(mpsc::Receiver<Vec<u8>>);
    struct FarTx(mpsc::Sender<Vec<u8>>);

    #[async_trait]
    impl ByteSource for FarRx {
        async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait]
    impl ByteSink for FarTx {
        async fn send(&mut self, data: &[u8]) -> Result<()> {
            self.0
                .send(data.to_vec())
                .await
                .map_err(|_| Error::Transport("far side gone".to_string()))
        }
    }

    fn far_pair() -> (FarRx, FarTx, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(16);
        (FarRx(out_rx), FarTx(in_tx), out_tx, in_rx)
    }

    #[test]
    fn test_decoder_carries_split_sequence() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo €".as_bytes();
        let euro = bytes.len() - 3;

        assert_eq!(decoder.decode(&bytes[..euro + 1]), "héllo ");
        assert_eq!(decoder.decode(&bytes[euro + 1..]), "€");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"c\xe2\x82"), "c");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_input_is_unwrapped_and_legacy_forwarded() {
        let (mut near_rx, mut near_tx, client_tx, _client_rx) = channel_transport(16);
        let (mut far_rx, mut far_tx, _out_tx, mut in_rx) = far_pair();
        let cancel = CancellationToken::new();

        client_tx
            .send(r#"{"type":"input","data":"42\n"}"#.to_string())
            .await
            .unwrap();
        client_tx
            .send(r#"{"type":"input","data":""}"#.to_string())
            .await
            .unwrap();
        client_tx.send("raw text".to_string()).await.unwrap();
        drop(client_tx);

        let end = run(&mut near_rx, &mut near_tx, &mut far_rx, &mut far_tx, &cancel).await;
        assert_eq!(end, BridgeEnd::NearClosed);
        assert_eq!(in_rx.recv().await.unwrap(), b"42\n".to_vec());
        assert_eq!(in_rx.recv().await.unwrap(), b"raw text".to_vec());
        assert!(in_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_output_order_preserved_until_far_closes() {
        let (mut near_rx, mut near_tx, _client_tx, mut client_rx) = channel_transport(16);
        let (mut far_rx, mut far_tx, out_tx, _in_rx) = far_pair();
        let cancel = CancellationToken::new();

        for chunk in ["one ", "two ", "three"] {
            out_tx.send(chunk.as_bytes().to_vec()).await.unwrap();
        }
        drop(out_tx);

        let end = run(&mut near_rx, &mut near_tx, &mut far_rx, &mut far_tx, &cancel).await;
        assert_eq!(end, BridgeEnd::FarClosed);

        let mut received = Vec::new();
        while let Ok(text) = client_rx.try_recv() {
            received.push(text);
        }
        assert_eq!(received, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn test_second_start_is_a_violation() {
        let (mut near_rx, mut near_tx, client_tx, _client_rx) = channel_transport(16);
        let (mut far_rx, mut far_tx, _out_tx, mut in_rx) = far_pair();
        let cancel = CancellationToken::new();

        client_tx
            .send(r#"{"type":"start","code":"print(2)"}"#.to_string())
            .await
            .unwrap();

        let end = run(&mut near_rx, &mut near_tx, &mut far_rx, &mut far_tx, &cancel).await;
        assert_eq!(end, BridgeEnd::ProtocolViolation);
        assert!(in_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_stops_idle_bridge() {
        let (mut near_rx, mut near_tx, _client_tx, _client_rx) = channel_transport(16);
        let (mut far_rx, mut far_tx, _out_tx, _in_rx) = far_pair();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let end = tokio::time::timeout(
            Duration::from_secs(5),
            run(&mut near_rx, &mut near_tx, &mut far_rx, &mut far_tx, &cancel),
        )
        .await
        .unwrap();
        assert_eq!(end, BridgeEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_far_write_failure_ends_bridge() {
        let (mut near_rx, mut near_tx, client_tx, _client_rx) = channel_transport(16);
        let (mut far_rx, mut far_tx, _out_tx, in_rx) = far_pair();
        let cancel = CancellationToken::new();
        drop(in_rx);

        client_tx.send("data".to_string()).await.unwrap();
        let end = run(&mut near_rx, &mut near_tx, &mut far_rx, &mut far_tx, &cancel).await;
        assert_eq!(end, BridgeEnd::FarError);
    }
}
