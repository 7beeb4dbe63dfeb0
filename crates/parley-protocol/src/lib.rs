//! # parley-protocol
//!
//! Wire data model and push protocol for the Parley messaging server.
//!
//! This crate defines what travels between the server and its clients:
//!
//! - `UserId` / `SenderRef` / `ChatMessage` - The message record and its identities
//! - `Frame` - Events pushed over a live connection
//! - `codec` - JSON text frames and length-prefixed MessagePack binary frames
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame};
//!
//! let frame = Frame::event("getOnlineUsers", serde_json::json!([]));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod model;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{events, Frame, PROTOCOL_VERSION};
pub use model::{
    generate_id, ChatMessage, InvalidUserId, MessageId, SenderProfile, SenderRef, UserId,
};
