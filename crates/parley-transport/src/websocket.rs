//! WebSocket push connections.
//!
//! A [`WebSocketConnection`] is the handle the core holds: it queues frames
//! onto an unbounded channel. [`run_writer`] owns the socket's sink half and
//! drains that channel, encoding each frame for the client.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use parley_protocol::{codec, Encoding, Frame};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::traits::{ConnectionId, PushConnection, TransportError};

/// Handle to a live WebSocket push channel.
#[derive(Debug, Clone)]
pub struct WebSocketConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl WebSocketConnection {
    /// Create a connection handle and the queue its writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        Self::with_id(ConnectionId::generate())
    }

    /// Create a connection handle with a specific ID.
    #[must_use]
    pub fn with_id(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }
}

impl PushConnection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Encode a frame as a WebSocket message.
///
/// # Errors
///
/// Returns an error if the frame cannot be encoded.
pub fn encode_message(frame: &Frame, encoding: Encoding) -> Result<Message, TransportError> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    Ok(message)
}

/// Drain queued frames into a WebSocket sink until the queue closes or a
/// `Close` frame is written.
///
/// Frames that fail to encode are logged and skipped.
///
/// # Errors
///
/// Returns an error if the sink rejects a write.
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    encoding: Encoding,
    connection_id: ConnectionId,
) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let closing = matches!(frame, Frame::Close { .. });

        let message = match encode_message(&frame, encoding) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %connection_id, kind = frame.kind(), error = %e, "Dropping unencodable frame");
                continue;
            }
        };

        sink.send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if closing {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!(connection = %connection_id, error = %e, "Close after close frame failed");
            }
            break;
        }
    }

    rx.close();
    debug!(connection = %connection_id, "Writer finished");
    Ok(())
}
