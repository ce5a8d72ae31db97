//! Connection manager
//!
//! Keeps one client logged in over a [`Channel`]. An explicit
//! [`ConnectionManager::connect`] runs the full sequence (probe, authenticate,
//! open the chat stream) and only then reports the link as online. After that
//! a watcher task follows the channel's connectivity state:
//! - leaving `Ready` clears `authenticated`
//! - `Idle` while the link should be online sends a probe, which makes the
//!   channel reconnect
//! - `Ready` while the link should be online but is not authenticated claims
//!   one recovery, which re-runs the sequence for a fresh token
//! - a recovery that fails with a transport error on a ready channel is
//!   claimed again after a short delay
//!
//! `ready`, `authenticated` and `should_be_online` are always read and written
//! together as one [`LinkState`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::channel::{Channel, ChatStream, ConnectivityState, Connector};
use crate::auth::Credentials;
use crate::broker::ServerMessage;
use crate::transport::message::ClientMessage;
use crate::utils::Status;

/// Wait before claiming another recovery after one failed on a reachable
/// server.
const RECOVERY_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Disconnected,
    Authenticating,
    Online,
    /// Should be online but is not, and no attempt is running.
    Degraded,
    /// A recovery has been claimed and is about to run.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    pub ready: bool,
    pub authenticated: bool,
    pub should_be_online: bool,
    pub phase: Phase,
}

impl LinkState {
    pub fn is_online(&self) -> bool {
        self.ready && self.authenticated
    }

    fn settled_phase(&self) -> Phase {
        if self.is_online() {
            Phase::Online
        } else if self.should_be_online {
            Phase::Degraded
        } else {
            Phase::Disconnected
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ServerMessage),
    StateChanged {
        previous: ConnectivityState,
        current: ConnectivityState,
    },
    /// A failure that automatic recovery will not handle.
    Error(Status),
    StreamClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Explicit,
    Recovery,
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    deadline: Duration,
    link: watch::Sender<LinkState>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    /// Outbound half of the current chat stream, tagged with its generation.
    outbound: Mutex<Option<(u64, mpsc::UnboundedSender<ClientMessage>)>>,
    generation: AtomicU64,
    /// Bumped by every shutdown; an attempt that sees it move does not commit.
    epoch: AtomicU64,
    connecting: AsyncMutex<()>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        deadline: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(LinkState::default());
        let inner = Inner {
            connector,
            credentials,
            deadline,
            link,
            channel: Mutex::new(None),
            watcher: Mutex::new(None),
            outbound: Mutex::new(None),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            connecting: AsyncMutex::new(()),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Connects and logs in. On failure the channel is torn down and the
    /// error is returned; the link is never left half authenticated.
    pub async fn connect(&self) -> Result<(), Status> {
        self.inner.establish(Attempt::Explicit).await
    }

    pub fn is_online(&self) -> bool {
        self.inner.snapshot().is_online()
    }

    pub fn state(&self) -> LinkState {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }

    /// Hands one message to the chat stream.
    pub fn send(&self, text: &str) -> Result<(), Status> {
        if !self.is_online() {
            return Err(Status::unavailable("not online"));
        }
        let outbound = self.inner.outbound.lock();
        let Some((_, sender)) = outbound.as_ref() else {
            return Err(Status::unavailable("no open chat stream"));
        };
        sender
            .send(ClientMessage {
                text: text.to_string(),
            })
            .map_err(|_| Status::unavailable("chat stream closed"))
    }

    /// Stops wanting to be online, then tears the channel down.
    pub fn shutdown_now(&self) {
        let inner = &self.inner;
        inner.update(|state| {
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            state.should_be_online = false;
        });
        inner.teardown();
        inner.update(|state| {
            state.ready = false;
            state.authenticated = false;
            state.phase = Phase::Disconnected;
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

impl Inner {
    fn snapshot(&self) -> LinkState {
        *self.link.borrow()
    }

    fn update(&self, change: impl FnOnce(&mut LinkState)) {
        self.link.send_if_modified(|state| {
            let before = *state;
            change(state);
            *state != before
        });
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    async fn establish(self: &Arc<Self>, attempt: Attempt) -> Result<(), Status> {
        let _connecting = self.connecting.lock().await;

        if attempt == Attempt::Explicit
            && self.snapshot().is_online()
            && self.outbound.lock().is_some()
        {
            debug!("already online");
            return Ok(());
        }

        if attempt == Attempt::Recovery {
            let state = self.snapshot();
            if !state.should_be_online || state.authenticated {
                self.update(|state| state.phase = state.settled_phase());
                return Ok(());
            }
            info!("re-authenticating after reconnect");
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let channel = self.ensure_channel();
        self.update(|state| {
            state.authenticated = false;
            state.phase = Phase::Authenticating;
        });

        let result = match self.handshake(channel.as_ref()).await {
            Ok(stream) => self.commit(epoch, channel.as_ref(), stream),
            Err(status) => Err(status),
        };

        match result {
            Ok(()) => {
                info!(login = self.credentials.login(), "online");
                Ok(())
            }
            Err(status) if attempt == Attempt::Recovery && status.is_retryable() => {
                debug!(%status, "recovery failed, retrying");
                self.update(|state| state.phase = state.settled_phase());
                self.retry_recovery();
                Err(status)
            }
            Err(status) => {
                warn!(%status, "connect failed");
                self.update(|state| {
                    state.should_be_online = false;
                    state.authenticated = false;
                });
                self.teardown();
                self.update(|state| {
                    state.ready = false;
                    state.phase = Phase::Disconnected;
                });
                if attempt == Attempt::Recovery {
                    self.emit(ChatEvent::Error(status.clone()));
                }
                Err(status)
            }
        }
    }

    async fn handshake(&self, channel: &dyn Channel) -> Result<ChatStream, Status> {
        if !channel.state().is_ready() {
            if let Err(status) = channel.ping(None, self.deadline).await {
                if status.is_retryable() {
                    return Err(status);
                }
                debug!(%status, "probe reached the server");
            }
        }
        let token = channel.authenticate(&self.credentials, self.deadline).await?;
        channel.open_chat(&token).await
    }

    /// Marks the link authenticated and installs the stream, unless a
    /// shutdown happened while the attempt was running.
    fn commit(
        self: &Arc<Self>,
        epoch: u64,
        channel: &dyn Channel,
        stream: ChatStream,
    ) -> Result<(), Status> {
        let mut committed = false;
        self.link.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            state.ready = channel.state().is_ready();
            state.authenticated = true;
            state.should_be_online = true;
            state.phase = state.settled_phase();
            committed = true;
            true
        });
        if !committed {
            return Err(Status::unavailable("shut down while connecting"));
        }
        self.install(stream);
        Ok(())
    }

    fn install(self: &Arc<Self>, stream: ChatStream) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ChatStream { outbound, inbound } = stream;
        *self.outbound.lock() = Some((generation, outbound));
        tokio::spawn(pump(Arc::downgrade(self), generation, inbound));
    }

    /// Current channel, or a fresh one with its own watcher if the previous
    /// one is gone.
    fn ensure_channel(self: &Arc<Self>) -> Arc<dyn Channel> {
        let mut slot = self.channel.lock();
        if let Some(channel) = slot.as_ref().filter(|channel| !channel.is_terminated()) {
            return Arc::clone(channel);
        }

        let channel = self.connector.connect();
        let states = channel.watch_state();
        let initial = *states.borrow();
        let watcher = tokio::spawn(watch_channel(Arc::downgrade(self), initial, states));
        if let Some(previous) = self.watcher.lock().replace(watcher) {
            previous.abort();
        }
        *slot = Some(Arc::clone(&channel));
        channel
    }

    fn teardown(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.shutdown_now();
        }
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.outbound.lock().take();
    }

    fn claim_recovery(&self) -> bool {
        self.link.send_if_modified(|state| {
            let idle = !matches!(state.phase, Phase::Authenticating | Phase::Reconnecting);
            if state.ready && state.should_be_online && !state.authenticated && idle {
                state.phase = Phase::Reconnecting;
                true
            } else {
                false
            }
        })
    }

    /// Claims another recovery after [`RECOVERY_RETRY`] if the channel is
    /// still ready. A channel that is not ready re-arms through the watcher.
    fn retry_recovery(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(RECOVERY_RETRY).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.claim_recovery() {
                inner.spawn_recovery();
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.outbound.lock().as_ref(), Some((current, _)) if *current == generation)
    }

    fn spawn_recovery(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _ = inner.establish(Attempt::Recovery).await;
        });
    }

    /// Applies the channel's latest state. Returns it.
    fn on_connectivity(
        self: &Arc<Self>,
        previous: ConnectivityState,
        states: &mut watch::Receiver<ConnectivityState>,
    ) -> ConnectivityState {
        let mut current = previous;
        // Read under the link lock so a concurrent commit cannot be undone
        // by a stale state.
        self.update(|state| {
            current = *states.borrow_and_update();
            let ready = current.is_ready();
            state.ready = ready;
            if !ready {
                state.authenticated = false;
                if state.phase == Phase::Online {
                    state.phase = Phase::Degraded;
                }
            }
        });
        if previous != current {
            self.emit(ChatEvent::StateChanged { previous, current });
        }

        if !self.snapshot().should_be_online {
            return current;
        }
        match current {
            ConnectivityState::Idle => {
                let Some(channel) = self.channel.lock().clone() else {
                    return current;
                };
                let deadline = self.deadline;
                tokio::spawn(async move {
                    if let Err(status) = channel.ping(None, deadline).await {
                        debug!(%status, "reconnect probe");
                    }
                });
            }
            ConnectivityState::Ready => {
                if self.claim_recovery() {
                    self.spawn_recovery();
                }
            }
            _ => {}
        }
        current
    }

    fn on_stream_end(self: &Arc<Self>, generation: u64) {
        {
            let mut outbound = self.outbound.lock();
            match outbound.as_ref() {
                Some((current, _)) if *current == generation => {
                    outbound.take();
                }
                _ => return,
            }
        }

        self.emit(ChatEvent::StreamClosed);
        self.update(|state| {
            state.authenticated = false;
            if state.phase == Phase::Online {
                state.phase = Phase::Degraded;
            }
        });

        if self.claim_recovery() {
            self.spawn_recovery();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.get_mut().take() {
            channel.shutdown_now();
        }
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

async fn watch_channel(
    inner: Weak<Inner>,
    mut previous: ConnectivityState,
    mut states: watch::Receiver<ConnectivityState>,
) {
    while states.changed().await.is_ok() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let current = inner.on_connectivity(previous, &mut states);
        if current == ConnectivityState::Shutdown {
            break;
        }
        previous = current;
    }
}

async fn pump(
    inner: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<Result<ServerMessage, Status>>,
) {
    while let Some(item) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            trace!("dropping frame from a replaced chat stream");
            continue;
        }
        match item {
            Ok(message) => inner.emit(ChatEvent::Message(message)),
            Err(status) if status.is_retryable() => debug!(%status, "chat stream lost"),
            Err(status) => inner.emit(ChatEvent::Error(status)),
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.on_stream_end(generation);
    }
}
