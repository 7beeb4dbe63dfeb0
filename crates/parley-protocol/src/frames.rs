//! Frame types for the Parley push protocol.
//!
//! A frame is one unit pushed over a live connection. Frames travel as
//! JSON text or as length-prefixed MessagePack, depending on the encoding
//! the client asked for when it connected.

use crate::codec::ProtocolError;
use crate::model::{ChatMessage, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Event names carried by [`Frame::Event`].
pub mod events {
    /// A direct message addressed to the connected user.
    pub const NEW_MESSAGE: &str = "newMessage";
    /// Snapshot of all currently connected user ids.
    pub const ONLINE_USERS: &str = "getOnlineUsers";
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A named event with a JSON payload.
    #[serde(rename = "event")]
    Event {
        /// Event name.
        event: String,
        /// Event payload.
        payload: serde_json::Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// The server is closing this connection.
    #[serde(rename = "close")]
    Close {
        /// Why the connection is being closed.
        reason: String,
    },
}

impl Frame {
    /// Get the frame's type tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connected { .. } => "connected",
            Frame::Event { .. } => "event",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Close { .. } => "close",
        }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Event {
            event: event.into(),
            payload,
        }
    }

    /// Create a `newMessage` event for a message.
    ///
    /// The message is normalized on the way out, so whatever reaches the
    /// client carries a bare sender id.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be represented as JSON.
    pub fn new_message(message: &ChatMessage) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_value(message.clone().normalize())?;
        Ok(Self::event(events::NEW_MESSAGE, payload))
    }

    /// Create a `getOnlineUsers` event.
    #[must_use]
    pub fn online_users(users: &[UserId]) -> Self {
        let ids = users
            .iter()
            .map(|id| serde_json::Value::String(id.to_string()))
            .collect();
        Self::event(events::ONLINE_USERS, serde_json::Value::Array(ids))
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Close frame.
    #[must_use]
    pub fn close(reason: impl Into<String>) -> Self {
        Frame::Close {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SenderProfile, SenderRef};
    use serde_json::json;

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::ping(None).kind(), "ping");
        assert_eq!(Frame::close("replaced").kind(), "close");
        assert_eq!(Frame::event("x", json!(null)).kind(), "event");
    }

    #[test]
    fn test_new_message_is_normalized() {
        let sender = UserId::generate();
        let message = ChatMessage {
            id: "m1".into(),
            sender_id: SenderRef::Profile(SenderProfile {
                id: sender.clone(),
                full_name: "Alice".into(),
                profile_pic: None,
            }),
            receiver_id: UserId::generate(),
            text: Some("hi".into()),
            image: None,
            created_at: 42,
        };

        match Frame::new_message(&message).unwrap() {
            Frame::Event { event, payload } => {
                assert_eq!(event, events::NEW_MESSAGE);
                assert_eq!(payload["senderId"], json!(sender.as_str()));
            }
            other => panic!("Expected Event frame, got {:?}", other),
        }
    }

    #[test]
    fn test_json_shape() {
        let frame = Frame::connected("conn_1", 30_000);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "connected", "connectionId": "conn_1", "version": 1, "heartbeat": 30000})
        );
    }

    #[test]
    fn test_online_users_payload() {
        let a = UserId::generate();
        match Frame::online_users(std::slice::from_ref(&a)) {
            Frame::Event { payload, .. } => assert_eq!(payload, json!([a.as_str()])),
            other => panic!("Expected Event frame, got {:?}", other),
        }
    }
}
