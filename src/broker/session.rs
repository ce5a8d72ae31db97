use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::broker::message::ServerMessage;
use crate::utils::Status;

/// Opaque bearer credential issued by `authenticate`.
pub type Token = String;

/// Outbound half of a session's chat stream.
pub type Sink = UnboundedSender<ServerMessage>;

/// Server-side record of one authenticated client.
///
/// A session is created by `authenticate`, receives its sink when the chat
/// stream opens and is dropped from the registry when that stream ends.
/// Reconnecting always creates a new session with a new token.
#[derive(Debug)]
pub struct Session {
    pub login: String,
    pub token: Token,
    sink: Option<Sink>,
    created_at: Instant,
}

/// Snapshot of a session handed out by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub login: String,
    pub token: Token,
    pub streaming: bool,
}

impl Session {
    pub fn new(login: impl Into<String>, token: Token) -> Self {
        Self {
            login: login.into(),
            token,
            sink: None,
            created_at: Instant::now(),
        }
    }

    pub fn sink(&self) -> Option<&Sink> {
        self.sink.as_ref()
    }

    /// Sets the outbound sink. Fails if one was ever attached before.
    pub fn attach_sink(&mut self, sink: Sink) -> Result<(), Status> {
        if self.sink.is_some() {
            return Err(Status::failed_precondition(format!(
                "session of '{}' already has a chat stream",
                self.login
            )));
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// True for a session that never opened its chat stream within `grace`.
    pub fn is_unclaimed(&self, grace: Duration) -> bool {
        self.sink.is_none() && self.created_at.elapsed() >= grace
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            login: self.login.clone(),
            token: self.token.clone(),
            streaming: self.sink.is_some(),
        }
    }
}
