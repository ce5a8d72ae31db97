use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::channel::Connector;
use super::manager::{ChatEvent, ConnectionManager, LinkState};
use super::ws_channel::WsConnector;
use crate::auth::Credentials;
use crate::config::ClientSettings;
use crate::utils::Status;

/// What happened to a message handed to [`ChatSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Blank text. Nothing was sent.
    Dropped,
    /// Offline. Held until the next successful send.
    Queued,
    Sent,
}

/// Chat front end over a [`ConnectionManager`]: buffers text written while
/// offline and surfaces inbound traffic as [`ChatEvent`]s.
pub struct ChatSession {
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    pending: VecDeque<String>,
}

impl ChatSession {
    pub fn new(connector: Arc<dyn Connector>, credentials: Credentials, settings: &ClientSettings) -> Self {
        let (manager, events) = ConnectionManager::new(connector, credentials, settings.deadline());
        Self {
            manager,
            events,
            pending: VecDeque::new(),
        }
    }

    /// Session talking to the configured server over WebSockets.
    pub fn connect_to(settings: &ClientSettings, credentials: Credentials) -> Self {
        Self::new(Arc::new(WsConnector::new(settings.clone())), credentials, settings)
    }

    pub async fn connect(&mut self) -> Result<(), Status> {
        self.manager.connect().await
    }

    pub fn send(&mut self, text: &str) -> Delivery {
        if text.trim().is_empty() {
            return Delivery::Dropped;
        }
        if !self.manager.is_online() {
            self.pending.push_back(text.to_string());
            return Delivery::Queued;
        }
        if let Err(status) = self.flush() {
            debug!(%status, "flush interrupted");
            self.pending.push_back(text.to_string());
            return Delivery::Queued;
        }
        match self.manager.send(text) {
            Ok(()) => Delivery::Sent,
            Err(status) => {
                debug!(%status, "send failed, queueing");
                self.pending.push_back(text.to_string());
                Delivery::Queued
            }
        }
    }

    /// Sends queued text in original order. Stops at the first failure and
    /// keeps the rest queued.
    fn flush(&mut self) -> Result<(), Status> {
        while let Some(text) = self.pending.pop_front() {
            if let Err(status) = self.manager.send(&text) {
                self.pending.push_front(text);
                return Err(status);
            }
        }
        Ok(())
    }

    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    pub fn is_online(&self) -> bool {
        self.manager.is_online()
    }

    pub fn link_state(&self) -> LinkState {
        self.manager.state()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn shutdown(&mut self) {
        self.manager.shutdown_now();
    }
}
