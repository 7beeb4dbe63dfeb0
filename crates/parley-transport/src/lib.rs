//! # parley-transport
//!
//! Push transport layer for the Parley messaging server.
//!
//! The core only ever needs to hand a frame to a live connection and move
//! on. This crate defines that contract and provides the WebSocket
//! implementation the server uses.
//!
//! ## Push Contract
//!
//! All push channels implement [`PushConnection`]. Sends are non-blocking:
//! frames are queued for the connection's writer task, and a failed send is
//! reported but never retried.
//!
//! ```rust,ignore
//! use parley_transport::PushConnection;
//!
//! fn notify(conn: &dyn PushConnection) {
//!     if let Err(e) = conn.emit("newMessage", payload) {
//!         tracing::warn!(connection = %conn.id(), error = %e, "push failed");
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, PushConnection, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{run_writer, WebSocketConnection};
