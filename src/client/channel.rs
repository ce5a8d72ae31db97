//! Client side of the RPC transport, as consumed by the connection manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::auth::Credentials;
use crate::broker::{ServerMessage, Token};
use crate::transport::message::ClientMessage;
use crate::utils::Status;

/// Externally observable phase of a [`Channel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    /// Terminal. A shut down channel never leaves this state.
    Shutdown,
}

impl ConnectivityState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectivityState::Ready)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectivityState::Idle => "idle",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Ready => "ready",
            ConnectivityState::TransientFailure => "transient-failure",
            ConnectivityState::Shutdown => "shutdown",
        })
    }
}

/// Both halves of an open chat stream.
///
/// Dropping `outbound` half-closes the stream. `inbound` ends when the
/// stream is over; a final `Err` says why it failed.
#[derive(Debug)]
pub struct ChatStream {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<Result<ServerMessage, Status>>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn state(&self) -> ConnectivityState;

    /// Level-triggered view of the connectivity state. Subscribe once and
    /// keep the receiver for the lifetime of the channel.
    fn watch_state(&self) -> watch::Receiver<ConnectivityState>;

    /// Liveness probe. Without a token the server refuses the call, which
    /// still proves it is reachable.
    async fn ping(&self, token: Option<&str>, deadline: Duration) -> Result<(), Status>;

    async fn authenticate(&self, credentials: &Credentials, deadline: Duration)
    -> Result<Token, Status>;

    /// Opens the chat stream. Returns once the server has accepted it.
    async fn open_chat(&self, token: &str) -> Result<ChatStream, Status>;

    /// Cancels every in-flight call and stream and moves to
    /// [`ConnectivityState::Shutdown`].
    fn shutdown_now(&self);

    fn is_terminated(&self) -> bool {
        self.state() == ConnectivityState::Shutdown
    }
}

/// Builds channels. Building does no I/O: a new channel starts idle.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Arc<dyn Channel>;
}
