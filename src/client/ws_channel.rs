//! WebSocket implementation of [`Channel`].
//!
//! Each call opens its own connection to `<url>/<method>`. The channel
//! itself holds no socket; it tracks connectivity from the outcome of those
//! connections:
//! - a call on a channel that is not ready moves it to `Connecting`
//! - reaching the server, even when the handshake is refused, moves it to
//!   `Ready` and resets the backoff
//! - failing to reach the server moves it to `TransientFailure`, and back to
//!   `Idle` once the backoff delay has passed
//! - a chat stream closed by the server moves it to `Idle`; a chat stream
//!   that breaks moves it to `TransientFailure`
//! - a call that misses its deadline counts as unreachable
//! - a chat stream the client closed first moves nothing

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::Response;
use tungstenite::protocol::Message as WsMessage;

use super::channel::{Channel, ChatStream, ConnectivityState, Connector};
use crate::auth::Credentials;
use crate::broker::{ServerMessage, Token};
use crate::config::ClientSettings;
use crate::transport::message::{AuthResponse, ClientMessage, PingMessage};
use crate::transport::metadata::{Metadata, Method};
use crate::utils::{Code, Status};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds [`WsChannel`]s for one server.
#[derive(Debug, Clone)]
pub struct WsConnector {
    settings: ClientSettings,
}

impl WsConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> Arc<dyn Channel> {
        Arc::new(WsChannel::new(self.settings.clone()))
    }
}

pub struct WsChannel {
    shared: Arc<Shared>,
}

struct Shared {
    settings: ClientSettings,
    state: watch::Sender<ConnectivityState>,
    failures: AtomicU32,
    cancel: CancellationToken,
}

impl WsChannel {
    pub fn new(settings: ClientSettings) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Idle);
        Self {
            shared: Arc::new(Shared {
                settings,
                state,
                failures: AtomicU32::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Runs a unary call under `deadline`.
    async fn with_deadline<T, F>(&self, method: Method, deadline: Duration, call: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        match time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.unreachable();
                Err(Status::deadline_exceeded(format!(
                    "{method} did not complete within {deadline:?}"
                )))
            }
        }
    }
}

impl Shared {
    fn current(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Moves to `next` unless the channel is shut down. Returns whether the
    /// state changed.
    fn transition(&self, next: ConnectivityState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ConnectivityState::Shutdown || *current == next {
                return false;
            }
            trace!(from = %current, to = %next, "channel state");
            *current = next;
            true
        })
    }

    fn transition_from(&self, expected: ConnectivityState, next: ConnectivityState) -> bool {
        self.state.send_if_modified(|current| {
            if *current != expected {
                return false;
            }
            *current = next;
            true
        })
    }

    fn reached(&self) {
        self.failures.store(0, Ordering::Relaxed);
        self.transition(ConnectivityState::Ready);
    }

    fn unreachable(self: &Arc<Self>) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.transition(ConnectivityState::TransientFailure) {
            return;
        }

        let delay = backoff(&self.settings, failures);
        debug!(failures, ?delay, "server unreachable, backing off");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    shared.transition_from(ConnectivityState::TransientFailure, ConnectivityState::Idle);
                }
                _ = shared.cancel.cancelled() => {}
            }
        });
    }

    async fn open(self: &Arc<Self>, method: Method, metadata: &Metadata) -> Result<WsStream, Status> {
        if self.cancel.is_cancelled() {
            return Err(shut_down());
        }

        let url = format!("{}{}", self.settings.url(), method.path());
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Status::invalid_argument(format!("invalid server url {url}: {e}")))?;
        metadata.apply(request.headers_mut())?;

        if self.current() != ConnectivityState::Ready {
            self.transition(ConnectivityState::Connecting);
        }

        let attempt = time::timeout(self.settings.connect_timeout(), connect_async(request));
        let outcome = tokio::select! {
            outcome = attempt => outcome,
            _ = self.cancel.cancelled() => return Err(shut_down()),
        };

        match outcome {
            Ok(Ok((ws, _))) => {
                self.reached();
                Ok(ws)
            }
            Ok(Err(tungstenite::Error::Http(response))) => {
                self.reached();
                Err(rejection(&response))
            }
            Ok(Err(e)) => {
                self.unreachable();
                Err(Status::unavailable(format!("failed to reach {url}: {e}")))
            }
            Err(_) => {
                self.unreachable();
                Err(Status::unavailable(format!("timed out connecting to {url}")))
            }
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn state(&self) -> ConnectivityState {
        self.shared.current()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.state.subscribe()
    }

    async fn ping(&self, token: Option<&str>, deadline: Duration) -> Result<(), Status> {
        let metadata = token.map(Metadata::with_token).unwrap_or_default();
        self.with_deadline(Method::Ping, deadline, async {
            let mut ws = self.shared.open(Method::Ping, &metadata).await?;
            let probe = serde_json::to_string(&PingMessage::default())
                .map_err(|e| Status::internal(format!("failed to encode ping: {e}")))?;
            ws.send(WsMessage::text(probe)).await.map_err(broken)?;

            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let pong: PingMessage = serde_json::from_str(&text)
                            .map_err(|e| Status::internal(format!("invalid ping reply: {e}")))?;
                        if pong.ack {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Err(frame
                            .as_ref()
                            .and_then(Status::from_close_frame)
                            .unwrap_or_else(|| Status::unavailable("ping stream closed")));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(broken(e)),
                    None => return Err(Status::unavailable("ping stream closed")),
                }
            }

            let _ = ws.close(None).await;
            Ok::<(), Status>(())
        })
        .await
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        deadline: Duration,
    ) -> Result<Token, Status> {
        let metadata = Metadata::with_basic(credentials);
        self.with_deadline(Method::Authenticate, deadline, async {
            let mut ws = self.shared.open(Method::Authenticate, &metadata).await?;

            let token = loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let response: AuthResponse = serde_json::from_str(&text)
                            .map_err(|e| Status::internal(format!("invalid authenticate reply: {e}")))?;
                        break response.token;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Err(frame
                            .as_ref()
                            .and_then(Status::from_close_frame)
                            .unwrap_or_else(|| Status::internal("authenticate returned no token")));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(broken(e)),
                    None => return Err(Status::unavailable("authenticate call closed")),
                }
            };

            let _ = ws.close(None).await;
            Ok::<Token, Status>(token)
        })
        .await
    }

    async fn open_chat(&self, token: &str) -> Result<ChatStream, Status> {
        let shared = &self.shared;
        let mut ws = shared.open(Method::Chat, &Metadata::with_token(token)).await?;

        // The server greets every new stream with its join notice.
        let first = time::timeout(shared.settings.connect_timeout(), async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => return decode(&text),
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Err(frame
                            .as_ref()
                            .and_then(Status::from_close_frame)
                            .unwrap_or_else(|| Status::unavailable("chat stream closed")));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(broken(e)),
                    None => return Err(Status::unavailable("chat stream closed")),
                }
            }
        });
        let first = tokio::select! {
            first = first => first
                .map_err(|_| Status::deadline_exceeded("chat stream was not accepted in time"))??,
            _ = shared.cancel.cancelled() => return Err(shut_down()),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = inbound_tx.send(Ok(first));
        tokio::spawn(drive_chat(Arc::clone(shared), ws, outbound_rx, inbound_tx));

        Ok(ChatStream {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn shutdown_now(&self) {
        self.shared.state.send_replace(ConnectivityState::Shutdown);
        self.shared.cancel.cancel();
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

enum Ending {
    /// The server closed the stream, possibly with a status.
    Closed(Option<Status>),
    Failed(Status),
    Cancelled,
}

async fn drive_chat(
    shared: Arc<Shared>,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<Result<ServerMessage, Status>>,
) {
    let (mut sink, mut source) = ws.split();
    let keepalive_time = shared.settings.keepalive_time();
    let keepalive_timeout = shared.settings.keepalive_timeout();
    let mut keepalive = time::interval_at(Instant::now() + keepalive_time, keepalive_time);
    let mut last_seen = Instant::now();
    let mut half_closed = false;

    let ending = loop {
        tokio::select! {
            message = outbound.recv(), if !half_closed => match message {
                Some(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::text(json)).await {
                        break Ending::Failed(broken(e));
                    }
                }
                None => {
                    half_closed = true;
                    let _ = sink.send(WsMessage::Close(None)).await;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    last_seen = Instant::now();
                    match decode(&text) {
                        Ok(message) => {
                            let _ = inbound.send(Ok(message));
                        }
                        Err(status) => warn!(%status, "dropping undecodable frame"),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break Ending::Closed(frame.as_ref().and_then(Status::from_close_frame));
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => break Ending::Failed(broken(e)),
                None => break Ending::Failed(Status::unavailable("chat stream ended without a close")),
            },
            _ = keepalive.tick() => {
                if last_seen.elapsed() >= keepalive_timeout {
                    break Ending::Failed(Status::unavailable("keepalive timeout"));
                }
                if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                    break Ending::Failed(broken(e));
                }
            }
            _ = shared.cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break Ending::Cancelled;
            }
        }
    };

    // A stream the client closed itself says nothing about the server.
    if half_closed {
        debug!("chat stream finished after client close");
        return;
    }

    // The channel state moves before the inbound half closes.
    match ending {
        Ending::Closed(status) => {
            debug!(?status, "chat stream closed by server");
            shared.transition_from(ConnectivityState::Ready, ConnectivityState::Idle);
            if let Some(status) = status {
                let _ = inbound.send(Err(status));
            }
        }
        Ending::Failed(status) => {
            debug!(%status, "chat stream failed");
            shared.unreachable();
            let _ = inbound.send(Err(status));
        }
        Ending::Cancelled => {}
    }
}

/// `initial * multiplier^(failures - 1)`, capped.
pub(super) fn backoff(settings: &ClientSettings, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
    let millis = settings.backoff_initial_ms as f64 * settings.backoff_multiplier.powi(exponent);
    let capped = millis.min(settings.backoff_max_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

fn decode(text: &str) -> Result<ServerMessage, Status> {
    serde_json::from_str(text).map_err(|e| Status::internal(format!("invalid server message: {e}")))
}

fn broken(e: tungstenite::Error) -> Status {
    Status::unavailable(format!("connection broken: {e}"))
}

fn shut_down() -> Status {
    Status::unavailable("channel is shut down")
}

/// Status carried by a refused handshake. The body holds `<CODE>: <message>`.
pub(super) fn rejection(response: &Response<Option<Vec<u8>>>) -> Status {
    let code = Code::from_http_status(response.status());
    let body = response
        .body()
        .as_deref()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let message = match body.split_once(": ") {
        Some((prefix, message)) if prefix.parse::<Code>() == Ok(code) => message.to_string(),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => response
            .status()
            .canonical_reason()
            .unwrap_or("call refused")
            .to_string(),
    };
    Status::new(code, message)
}
