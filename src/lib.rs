//! # PopChat
//!
//! `popchat` is a multi-user text chat over a small streaming RPC protocol
//! carried on WebSockets. Clients authenticate, open a chat stream, and every
//! message is broadcast to all connected peers.
//!
//! ## Core Modules
//!
//! - `auth`: Credential parsing, token issuance and the gate that admits calls.
//! - `broker`: The session registry and the broadcast engine.
//! - `client`: The client connection state machine and chat session.
//! - `config`: Loading server, auth and client settings.
//! - `service`: The chat service behind the `authenticate`, `chat` and `ping` calls.
//! - `transport`: The WebSocket server and the wire messages.
//! - `utils`: Status codes, errors and logging.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod service;
pub mod transport;
pub mod utils;
