//! Player WebSocket sessions
//!
//! One task reads frames and applies them to the bound room under its lock;
//! a second task drains the player's bounded outbound queue into the socket.
//! Once bound, the room holds the only strong sender and the connection keeps
//! a weak one, so whenever the room drops the transport the writer ends and
//! the connection closes with it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::WeakSender;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::game::state::PlayerId;
use crate::lobby::manager::SharedRoom;
use crate::lobby::player::{outbound_channel, PlayerTx};
use crate::lobby::{Room, RoomError};
use crate::metrics::Metrics;
use crate::net::dos_protection::{ConnectionPermit, MessageLimiter};
use crate::net::protocol::{parse_client_message, ClientMessage, ErrorCode, ServerMessage};
use crate::net::transport::{AppState, ErrorResponse};

/// Close the socket after this many refused frames
const MAX_VIOLATIONS: u32 = 50;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let permit = match state.connections.acquire(peer.ip()) {
        Ok(permit) => permit,
        Err(e) => {
            warn!(%peer, error = %e, "connection refused");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new(e.code(), e.to_string())),
            )
                .into_response();
        }
    };

    let span = info_span!("player_conn", %peer);
    ws.on_upgrade(move |socket| handle_socket(socket, state, permit).instrument(span))
}

/// Room binding established by `join_room`
struct Binding {
    room_id: String,
    room: SharedRoom,
    player_id: PlayerId,
}

struct PlayerConnection {
    state: Arc<AppState>,
    /// Strong sender while unbound; handed to the room on join
    held: Option<PlayerTx>,
    weak: WeakSender<ServerMessage>,
    binding: Option<Binding>,
    limiter: MessageLimiter,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, _permit: ConnectionPermit) {
    let metrics = state.metrics.clone();
    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    debug!("connection opened");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = outbound_channel();
    let weak = tx.downgrade();

    let writer_metrics = metrics.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            writer_metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
        let _ = sink.close().await;
    });

    let mut conn = PlayerConnection {
        limiter: MessageLimiter::new(&state.dos),
        state,
        held: Some(tx),
        weak,
        binding: None,
    };

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = &mut writer => {
                debug!("transport dropped by room");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "socket read failed");
                break;
            }
        };
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        match frame {
            Message::Text(text) => conn.handle_text(text.as_str()).await,
            Message::Binary(_) => conn.send_error(ErrorCode::InvalidCommand, "text frames only"),
            Message::Close(_) => break,
            _ => {}
        }

        if conn.limiter.violations() >= MAX_VIOLATIONS {
            warn!(violations = conn.limiter.violations(), "closing abusive connection");
            break;
        }
    }

    conn.on_closed().await;
    writer.abort();
    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    debug!("connection closed");
}

impl PlayerConnection {
    fn metrics(&self) -> &Metrics {
        &self.state.metrics
    }

    fn send_error(&self, code: ErrorCode, detail: impl Into<String>) {
        if let Some(tx) = self.weak.upgrade() {
            let _ = tx.try_send(ServerMessage::error(code, Some(detail.into())));
        }
    }

    /// Apply `op` to the bound room, unless a reconnect elsewhere took the player over
    async fn with_room<F>(&self, op: F)
    where
        F: FnOnce(&mut Room, PlayerId) -> Result<(), RoomError>,
    {
        let Some(b) = &self.binding else {
            self.send_error(ErrorCode::NotInRoom, "join a room first");
            return;
        };
        let mut room = b.room.write().await;
        let owned = self
            .weak
            .upgrade()
            .is_some_and(|tx| room.owns_transport(b.player_id, &tx));
        if !owned {
            debug!(player_id = %b.player_id, "frame on a replaced transport ignored");
            return;
        }
        if let Err(e) = op(&mut *room, b.player_id) {
            self.send_error(e.code(), e.to_string());
        }
    }

    async fn handle_text(&mut self, text: &str) {
        if let Err(e) = self.limiter.check(text.len(), Instant::now()) {
            self.metrics().messages_throttled.fetch_add(1, Ordering::Relaxed);
            self.send_error(e.code(), e.to_string());
            return;
        }

        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "rejected client frame");
                self.send_error(e.code(), e.to_string());
                return;
            }
        };

        match message {
            ClientMessage::JoinRoom {
                room_id,
                name,
                reconnect_token,
            } => self.join(room_id, name, reconnect_token).await,
            ClientMessage::PlayerInput(input) => {
                self.with_room(|room, player_id| room.handle_input(player_id, input))
                    .await
            }
            ClientMessage::StartGame { control_mode } => {
                self.with_room(|room, _| room.start_game(control_mode)).await
            }
            ClientMessage::ApplyUpgrade { stat } => {
                self.with_room(|room, player_id| room.apply_upgrade(player_id, &stat).map(|_| ()))
                    .await
            }
            ClientMessage::LeaveRoom => match self.binding.take() {
                Some(b) => {
                    // take the sender back before the room drops its copy
                    self.held = self.weak.upgrade();
                    let mut room = b.room.write().await;
                    if self
                        .held
                        .as_ref()
                        .is_some_and(|tx| room.owns_transport(b.player_id, tx))
                    {
                        room.leave(b.player_id);
                    }
                    drop(room);
                    self.metrics().players_connected.fetch_sub(1, Ordering::Relaxed);
                    info!(room_id = %b.room_id, player_id = %b.player_id, "left room");
                }
                None => self.send_error(ErrorCode::NotInRoom, "not in a room"),
            },
        }
    }

    async fn join(&mut self, room_id: String, name: String, reconnect_token: Option<String>) {
        if self.binding.is_some() {
            self.send_error(ErrorCode::InvalidCommand, "already in a room");
            return;
        }

        let room = match reconnect_token {
            // a reconnect never creates a room
            Some(_) => match self.state.registry.get(&room_id).await {
                Some(room) => room,
                None => {
                    self.send_error(ErrorCode::RoomNotFound, format!("room '{}' not found", room_id));
                    return;
                }
            },
            None => match self.state.registry.get_or_create(&room_id).await {
                Ok(room) => room,
                Err(e) => {
                    self.send_error(e.code(), e.to_string());
                    return;
                }
            },
        };

        let Some(tx) = self.held.clone() else {
            // the room that last held this transport dropped it
            return;
        };
        let joined = {
            let mut guard = room.write().await;
            match &reconnect_token {
                Some(token) => guard
                    .reconnect(token, Some(tx), Instant::now())
                    .ok_or_else(|| {
                        (
                            ErrorCode::InvalidReconnectToken,
                            "reconnect token not recognized".to_string(),
                        )
                    }),
                None => guard
                    .add_player(&name, Some(tx))
                    .map_err(|e| (e.code(), e.to_string())),
            }
        };

        match joined {
            Ok(joined) => {
                self.held = None;
                self.metrics().players_connected.fetch_add(1, Ordering::Relaxed);
                info!(
                    room_id = %room_id,
                    player_id = %joined.player_id,
                    reconnect = reconnect_token.is_some(),
                    "bound to room"
                );
                self.binding = Some(Binding {
                    room_id,
                    room,
                    player_id: joined.player_id,
                });
            }
            Err((code, detail)) => self.send_error(code, detail),
        }
    }

    /// Socket gone: keep the player's record for the reconnect window.
    /// Each binding is counted once, whether or not the room still knew this transport.
    async fn on_closed(&mut self) {
        if let Some(b) = self.binding.take() {
            if let Some(tx) = self.weak.upgrade() {
                b.room.write().await.release(b.player_id, &tx, Instant::now());
            }
            self.metrics().players_connected.fetch_sub(1, Ordering::Relaxed);
            info!(room_id = %b.room_id, player_id = %b.player_id, "transport lost");
        }
    }
}
