//! WebSocket transport: upgrade handling, the per-socket pump, and the
//! bridge from live sockets into the delivery hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use natter_core::{Connection, ConnectionId, NatterError, Result, ServerEvent};

use crate::config::AppState;
use crate::error::HandshakeError;

/// Close code for handshake refusals the client caused.
pub const POLICY_VIOLATION: u16 = 1008;
/// Close code for unexpected server-side failures.
pub const INTERNAL_ERROR: u16 = 1011;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub identity: Option<String>,
}

/// Frames queued for the writer task.
enum Outbound {
    Event(String),
    Ping,
    Close(u16, String),
}

/// Hub-facing handle for one socket. Sends never touch the network;
/// they queue onto the writer task, and a full or closed queue marks
/// the connection dead.
pub struct WsConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
}

impl WsConnection {
    fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: ConnectionId::next(),
            outbound,
        }
    }
}

#[async_trait::async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, event: &ServerEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.outbound
            .try_send(Outbound::Event(text))
            .map_err(|_| NatterError::ConnectionClosed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.outbound
            .try_send(Outbound::Close(code, reason.to_string()))
            .map_err(|_| NatterError::ConnectionClosed)
    }
}

/// GET /ws/chat/{chat_id} (WebSocket upgrade)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(chat_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, chat_id, params.identity))
}

/// Check the upgrade request against the membership directory.
async fn validate(
    state: &AppState,
    chat_id: &str,
    identity: Option<String>,
) -> std::result::Result<String, HandshakeError> {
    let identity = match identity {
        Some(identity) if !identity.trim().is_empty() => identity,
        _ => return Err(HandshakeError::IdentityRequired),
    };

    let directory = state.hub.directory();
    match directory.identity_exists(&identity).await {
        Ok(true) => {}
        Ok(false) => return Err(HandshakeError::UnknownIdentity(identity)),
        Err(e) => return Err(HandshakeError::Directory(e.to_string())),
    }
    match directory.chat_exists(chat_id).await {
        Ok(true) => {}
        Ok(false) => return Err(HandshakeError::UnknownChat(chat_id.to_string())),
        Err(e) => return Err(HandshakeError::Directory(e.to_string())),
    }

    Ok(identity)
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    chat_id: String,
    identity: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    // The handshake is checked after the upgrade so refusals carry a
    // proper close code instead of an HTTP status.
    let identity = match validate(&state, &chat_id, identity).await {
        Ok(identity) => identity,
        Err(e) => {
            info!("Handshake refused on {}: {}", chat_id, e);
            let frame = CloseFrame {
                code: e.close_code(),
                reason: e.to_string().into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<Outbound>(state.config.outbound_capacity.max(1));
    let connection = Arc::new(WsConnection::new(outbound_tx.clone()));
    let connection_id = connection.id();

    // Single writer task owns the sink; the hub and the heartbeat only
    // ever queue.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                Outbound::Event(text) => sink.send(Message::Text(text.into())).await,
                Outbound::Ping => sink.send(Message::Ping(Vec::new().into())).await,
                Outbound::Close(code, reason) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    if let Err(e) = hub.attach(&identity, connection.clone()).await {
        warn!("Attach of {} failed: {}", identity, e);
        hub.detach(&identity, connection_id).await;
        writer.abort();
        return;
    }

    let idle_limit = Duration::from_secs(state.config.ws_timeout_secs);
    let mut last_activity = Instant::now();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.heartbeat_secs));
    heartbeat.tick().await; // the first tick completes immediately

    let dyn_connection: Arc<dyn Connection> = connection.clone();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_activity = Instant::now();
                    if let Err(e) = hub
                        .handle_frame(&chat_id, &identity, &dyn_connection, text.as_str())
                        .await
                    {
                        error!("Connection {} faulted: {}", connection_id, e);
                        let _ = dyn_connection.close(INTERNAL_ERROR, "internal error").await;
                        break;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    last_activity = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Binary frames are not part of the protocol.
                    debug!("Ignoring non-text frame on {}", connection_id);
                }
                Some(Err(e)) => {
                    debug!("Socket error on {}: {}", connection_id, e);
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > idle_limit {
                    info!("{} idle past {}s, dropping", identity, idle_limit.as_secs());
                    break;
                }
                if outbound_tx.try_send(Outbound::Ping).is_err() {
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    hub.detach(&identity, connection_id).await;
    writer.abort();
    info!("{} socket closed ({})", identity, connection_id);
}
