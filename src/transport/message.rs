use serde::{Deserialize, Serialize};

pub use crate::broker::message::{ServerMessage, Timestamp};

/// Frame sent by the client on the `chat` stream. Only the raw text is
/// taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub text: String,
}

/// Frame exchanged on the `ping` stream. The server answers every inbound
/// ping with `ack = true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub ack: bool,
}

/// Single frame returned by `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}
