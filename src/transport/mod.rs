//! The `transport` module carries the chat calls over WebSockets.
//!
//! Every call opens its own WebSocket connection. The request path names the
//! method and the upgrade headers carry the call metadata. Frames are JSON
//! text; a call that fails after the upgrade is closed with a close frame
//! whose reason encodes the [`Status`](crate::utils::Status).

pub mod message;
pub mod metadata;
pub mod websocket;

pub use metadata::{Metadata, Method};
pub use websocket::{ChatServer, start_websocket_server};

#[cfg(test)]
mod tests;
