//! Push transport traits for Parley.
//!
//! These define what the core needs from a live connection: an identity
//! for compare-and-remove, and a fire-and-forget send.

use parley_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),
}

/// A live push channel to a single client.
///
/// Sends never wait on the network. Implementations queue the frame and
/// return; an `Err` means the frame was not queued, not that delivery
/// failed after queueing.
pub trait PushConnection: Send + Sync + fmt::Debug {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Queue a frame for delivery.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Queue a named event.
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        self.send(Frame::event(event, payload))
    }

    /// Ask the client to go away.
    fn close(&self, reason: &str) -> Result<(), TransportError> {
        self.send(Frame::close(reason))
    }
}
