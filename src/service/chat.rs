//! Chat service
//!
//! Business logic behind the three calls. The service never sees raw
//! metadata: it receives the identity bound by the auth gate (a login for
//! `authenticate`, a token for `chat`) and works against the shared
//! [`SessionRegistry`].
//!
//! Chat stream lifecycle:
//! - [`ChatService::open_chat`] attaches the stream's sink to the session and
//!   announces the newcomer to everybody, the newcomer included
//! - [`ChatService::receive`] stamps each inbound text and broadcasts it
//! - [`ChatService::close_chat`] removes the session and announces the leave,
//!   whether the stream completed or failed

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::auth::TokenGenerator;
use crate::broker::{ServerMessage, Session, SessionRegistry, Sink, Token};
use crate::transport::message::{AuthResponse, ClientMessage, PingMessage};
use crate::utils::Status;

/// One open chat stream, bound to the session that opened it.
#[derive(Debug)]
pub struct ChatCall {
    token: Token,
    login: String,
}

impl ChatCall {
    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// How a chat stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    Failed(String),
}

pub struct ChatService {
    registry: Arc<SessionRegistry>,
    tokens: TokenGenerator,
}

impl ChatService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            tokens: TokenGenerator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Issues a new token and session for `login`. Several sessions may share
    /// one login.
    pub fn authenticate(&self, login: String) -> AuthResponse {
        let token = self.tokens.generate();
        info!(%login, "client authenticated");
        self.registry.insert(Session::new(login, token.clone()));
        AuthResponse { token }
    }

    pub fn open_chat(&self, token: &str, sink: Sink) -> Result<ChatCall, Status> {
        let session = self.registry.attach_sink(token, sink)?;

        let text = format!("Client '{}' has entered the chat", session.login);
        info!("{text}");
        self.registry.broadcast(&ServerMessage::notice(text));

        Ok(ChatCall {
            token: session.token,
            login: session.login,
        })
    }

    pub fn receive(&self, call: &ChatCall, message: ClientMessage) -> Result<(), Status> {
        if message.text.trim().is_empty() {
            debug!(login = %call.login, "ignoring blank message");
            return Ok(());
        }

        let session = self
            .registry
            .lookup(&call.token)
            .ok_or_else(|| Status::failed_precondition("session is no longer registered"))?;

        debug!(from = %session.login, text = %message.text, "inbound message");
        self.registry
            .broadcast(&ServerMessage::stamped(session.login, message.text));
        Ok(())
    }

    pub fn close_chat(&self, call: ChatCall, end: StreamEnd) {
        if let StreamEnd::Failed(reason) = &end {
            debug!(login = %call.login, %reason, "chat stream failed");
        }
        self.registry.remove(&call.token);

        let text = format!("Disconnected: '{}'", call.login);
        info!("{text}");
        self.registry.broadcast(&ServerMessage::notice(text));
    }

    /// Liveness probe. Stateless.
    pub fn ping(&self, ping: PingMessage) -> PingMessage {
        trace!(ack = ping.ack, "ping in");
        PingMessage { ack: true }
    }
}
