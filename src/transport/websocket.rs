//! WebSocket transport
//!
//! Serves the chat calls over WebSockets. Responsibilities:
//! - Accept TCP connections; every connection carries exactly one call,
//!   addressed by the request path
//! - Run the auth gate inside the handshake, so refused calls never upgrade
//!   and never reach the chat service
//! - Drop connections that do not complete an admitted handshake within
//!   `max_connection_idle`
//! - Drive each admitted call: unary `authenticate`, the bidirectional
//!   `chat` stream (with keepalive pings) and the `ping` echo stream
//! - Close every open call with "going away" on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};
use uuid::Uuid;

use crate::auth::{AdmittedCall, AuthGate};
use crate::broker::{ServerMessage, SessionRegistry};
use crate::config::{ServerSettings, Settings};
use crate::service::{ChatService, StreamEnd};
use crate::transport::message::{ClientMessage, PingMessage};
use crate::transport::metadata::Metadata;
use crate::utils::{ServerError, Status};

/// How long a finished call waits for the peer to acknowledge the close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub struct ChatServer {
    listener: TcpListener,
    gate: Arc<AuthGate>,
    service: Arc<ChatService>,
    settings: ServerSettings,
}

impl ChatServer {
    pub async fn bind(settings: &Settings) -> Result<Self, ServerError> {
        let addr = settings.server.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::with_listener(listener, settings))
    }

    pub fn with_listener(listener: TcpListener, settings: &Settings) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            listener,
            gate: Arc::new(AuthGate::new(registry.clone(), &settings.auth)),
            service: Arc::new(ChatService::new(registry)),
            settings: settings.server.clone(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.service.registry().clone()
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("chat server listening on ws://{addr}"),
            Err(e) => warn!(error = %e, "chat server listening on unknown address"),
        }

        tokio::spawn(SessionRegistry::start_eviction_loop(
            self.registry(),
            self.settings.max_connection_idle(),
            shutdown.child_token(),
        ));

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let connection = Connection {
                gate: self.gate.clone(),
                service: self.service.clone(),
                settings: self.settings.clone(),
                shutdown: shutdown.child_token(),
            };
            let span = info_span!("conn", id = %format!("conn-{}", Uuid::new_v4()), %peer);
            tokio::spawn(connection.run(stream).instrument(span));
        }

        info!("chat server stopped");
    }
}

/// Binds the configured address and serves until `shutdown` is cancelled.
pub async fn start_websocket_server(
    settings: Settings,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let server = ChatServer::bind(&settings).await?;
    server.serve(shutdown).await;
    Ok(())
}

struct Connection {
    gate: Arc<AuthGate>,
    service: Arc<ChatService>,
    settings: ServerSettings,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        let mut admitted: Option<AdmittedCall> = None;

        let ws = {
            let gate = &self.gate;
            let admitted = &mut admitted;
            let callback = |request: &Request, response: Response| {
                let metadata = Metadata::from_headers(request.headers());
                match gate.admit(request.uri().path(), &metadata) {
                    Ok(call) => {
                        *admitted = Some(call);
                        Ok(response)
                    }
                    Err(status) => Err(reject(&status)),
                }
            };
            let handshake = time::timeout(
                self.settings.max_connection_idle(),
                accept_hdr_async(stream, callback),
            );

            tokio::select! {
                result = handshake => match result {
                    Ok(Ok(ws)) => ws,
                    Ok(Err(e)) => {
                        debug!(error = %e, "handshake refused or failed");
                        return;
                    }
                    Err(_) => {
                        info!("dropping connection idle before authentication");
                        return;
                    }
                },
                _ = self.shutdown.cancelled() => return,
            }
        };

        let Some(call) = admitted else {
            warn!("handshake completed without an admitted call");
            return;
        };
        debug!(method = %call.method(), "call admitted");

        match call {
            AdmittedCall::Authenticate { login } => self.serve_authenticate(ws, login).await,
            AdmittedCall::Chat { token } => self.serve_chat(ws, &token).await,
            AdmittedCall::Ping { .. } => self.serve_ping(ws).await,
        }
    }

    async fn serve_authenticate(&self, mut ws: WebSocketStream<TcpStream>, login: String) {
        let response = self.service.authenticate(login);
        let frame = match serde_json::to_string(&response) {
            Ok(json) => match ws.send(WsMessage::text(json)).await {
                Ok(()) => None,
                Err(e) => {
                    debug!(error = %e, "failed to deliver token");
                    return;
                }
            },
            Err(e) => Some(Status::internal(format!("failed to encode token: {e}")).to_close_frame()),
        };
        finish(ws, frame).await;
    }

    async fn serve_chat(&self, ws: WebSocketStream<TcpStream>, token: &str) {
        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let call = match self.service.open_chat(token, tx) {
            Ok(call) => call,
            Err(status) => {
                warn!(%status, "refusing chat stream");
                let _ = sink.send(WsMessage::Close(Some(status.to_close_frame()))).await;
                return;
            }
        };

        let keepalive_time = self.settings.keepalive_time();
        let keepalive_timeout = self.settings.keepalive_timeout();
        let mut keepalive = time::interval_at(Instant::now() + keepalive_time, keepalive_time);
        let mut last_seen = Instant::now();

        let end = loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(message) = outbound else {
                        break StreamEnd::Completed;
                    };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::text(json)).await {
                        break StreamEnd::Failed(e.to_string());
                    }
                }
                inbound = source.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                if let Err(status) = self.service.receive(&call, message) {
                                    let _ = sink.send(WsMessage::Close(Some(status.to_close_frame()))).await;
                                    break StreamEnd::Failed(status.to_string());
                                }
                            }
                            Err(e) => warn!(
                                error = %e,
                                "invalid client message: {}",
                                text.chars().take(100).collect::<String>()
                            ),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break StreamEnd::Completed,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                },
                _ = keepalive.tick() => {
                    if last_seen.elapsed() >= keepalive_timeout {
                        break StreamEnd::Failed("keepalive timeout".to_string());
                    }
                    if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                        break StreamEnd::Failed(e.to_string());
                    }
                }
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(WsMessage::Close(Some(going_away()))).await;
                    break StreamEnd::Completed;
                }
            }
        };

        debug!(login = call.login(), ?end, "chat stream ended");
        self.service.close_chat(call, end);
    }

    async fn serve_ping(&self, mut ws: WebSocketStream<TcpStream>) {
        loop {
            tokio::select! {
                inbound = ws.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let ping = match serde_json::from_str::<PingMessage>(&text) {
                            Ok(ping) => ping,
                            Err(e) => {
                                warn!(error = %e, "invalid ping message");
                                continue;
                            }
                        };
                        let pong = self.service.ping(ping);
                        let Ok(json) = serde_json::to_string(&pong) else {
                            continue;
                        };
                        if ws.send(WsMessage::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "ping stream failed");
                        break;
                    }
                },
                _ = self.shutdown.cancelled() => {
                    finish(ws, Some(going_away())).await;
                    return;
                }
            }
        }
    }
}

/// Handshake response for a refused call. The body carries the status.
fn reject(status: &Status) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(status.to_string()));
    *response.status_mut() = status.code.http_status();
    response
}

fn going_away() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Away,
        reason: "server shutting down".into(),
    }
}

/// Sends a close frame and waits briefly for the peer to acknowledge it.
async fn finish(mut ws: WebSocketStream<TcpStream>, frame: Option<CloseFrame>) {
    if ws.close(frame).await.is_err() {
        return;
    }
    let _ = time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
