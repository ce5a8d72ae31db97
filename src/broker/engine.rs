//! Session registry and broadcast engine
//!
//! The registry maps bearer tokens to sessions. It is the only shared
//! mutable state on the server and sits behind a single lock:
//! - inserts, removals and sink attachment are atomic with respect to each
//!   other
//! - a broadcast holds the lock for its whole fan-out, so no registry change
//!   interleaves with one broadcast's view of the membership
//!
//! Sinks are unbounded channels drained by each connection's own task, so
//! sending while holding the lock never blocks on the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::message::ServerMessage;
use crate::broker::session::{Session, SessionInfo, Sink, Token};
use crate::utils::Status;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Token, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a freshly authenticated session under its token.
    pub fn insert(&self, session: Session) {
        let login = session.login.clone();
        let mut sessions = self.sessions.lock();
        sessions.insert(session.token.clone(), session);
        debug!(%login, sessions = sessions.len(), "session registered");
    }

    pub fn lookup(&self, token: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(token).map(Session::info)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.sessions.lock().contains_key(token)
    }

    /// Attaches the outbound sink of a newly opened chat stream.
    pub fn attach_sink(&self, token: &str, sink: Sink) -> Result<SessionInfo, Status> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(token)
            .ok_or_else(|| Status::failed_precondition("session is no longer registered"))?;
        session.attach_sink(sink)?;
        Ok(session.info())
    }

    pub fn remove(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(token);
        if let Some(session) = &removed {
            debug!(login = %session.login, sessions = sessions.len(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Sends `message` to every session that has an open chat stream.
    ///
    /// Delivery is serial and happens under the registry lock. Returns the
    /// number of sinks that accepted the message.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let sessions = self.sessions.lock();
        let mut delivered = 0;

        for session in sessions.values() {
            let Some(sink) = session.sink() else {
                continue;
            };
            match sink.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(login = %session.login, "chat stream already closed, skipping"),
            }
        }

        info!(from = %message.from, recipients = delivered, "broadcast");
        delivered
    }

    /// Drops sessions that authenticated but never opened a chat stream
    /// within `grace`. Returns how many were dropped.
    pub fn evict_unclaimed(&self, grace: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_unclaimed(grace));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "dropped sessions that never opened a chat stream");
        }
        evicted
    }

    /// Runs [`SessionRegistry::evict_unclaimed`] periodically until cancelled.
    pub async fn start_eviction_loop(
        registry: Arc<SessionRegistry>,
        grace: Duration,
        shutdown: CancellationToken,
    ) {
        let period = (grace / 2).max(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    registry.evict_unclaimed(grace);
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
