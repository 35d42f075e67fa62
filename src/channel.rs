//! Client message channel abstraction.
//!
//! The session orchestrator talks to the candidate through [`ClientChannel`]
//! so the turn engine, audio coordinator, and supervisor never touch the
//! transport directly. The production implementation wraps an axum
//! WebSocket; tests substitute an in-memory fake.
//!
//! All sends within one session serialize on the sink lock, so the client
//! observes envelopes in exactly the order the session emitted them.

use crate::error::{InterviewError, Result};
use crate::wire::{ClientEnvelope, ServerEnvelope};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Bidirectional JSON envelope channel to one interview client.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    /// Send one envelope to the client.
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the transport has failed or closed.
    async fn send(&self, envelope: &ServerEnvelope) -> Result<()>;

    /// Receive the next envelope from the client.
    ///
    /// Returns `Ok(None)` on a clean close. Malformed frames are logged and
    /// skipped rather than surfaced, so a buggy client cannot wedge the
    /// reader loop.
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the transport has failed.
    async fn recv(&self) -> Result<Option<ClientEnvelope>>;
}

/// [`ClientChannel`] over an axum WebSocket.
pub struct WebSocketChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WebSocketChannel {
    /// Wrap an accepted WebSocket connection.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl ClientChannel for WebSocketChannel {
    async fn send(&self, envelope: &ServerEnvelope) -> Result<()> {
        let json = serde_json::to_string(envelope)
            .map_err(|e| InterviewError::Channel(format!("failed to serialize envelope: {e}")))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| InterviewError::Channel(format!("websocket send failed: {e}")))
    }

    async fn recv(&self) -> Result<Option<ClientEnvelope>> {
        let mut stream = self.stream.lock().await;
        loop {
            let Some(frame) = stream.next().await else {
                return Ok(None);
            };
            let message =
                frame.map_err(|e| InterviewError::Channel(format!("websocket read failed: {e}")))?;
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(e) => {
                        warn!(error = %e, raw = %text, "ignoring malformed client envelope");
                    }
                },
                Message::Close(_) => return Ok(None),
                Message::Binary(_) => {
                    warn!("ignoring unexpected binary frame from client");
                }
                // Protocol-level frames handled by the transport.
                Message::Ping(_) | Message::Pong(_) => {
                    debug!("transport control frame");
                }
            }
        }
    }
}
