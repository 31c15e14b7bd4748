//! Admin HTTP routes and the agent entry points

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::command::{CommandError, CommandOutcome};
use crate::net::dos_protection::MessageLimiter;
use crate::net::protocol::ErrorCode;
use crate::net::transport::{AppState, ErrorResponse};

pub async fn healthz() -> &'static str {
    "ok"
}

/// Ready while the registry can still take a new room
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let rooms = state.registry.len().await;
    let max_rooms = state.registry.max_rooms();
    let status = if rooms < max_rooms {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": status == StatusCode::OK,
            "rooms": rooms,
            "max_rooms": max_rooms,
        })),
    )
        .into_response()
}

pub async fn metrics_text(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
        .into_response()
}

pub async fn metrics_json(State(state): State<Arc<AppState>>) -> Response {
    Json(state.metrics.to_json()).into_response()
}

pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Response {
    Json(state.registry.list().await).into_response()
}

pub async fn room_summary(
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.registry.get(&room_id).await {
        Some(room) => Json(room.read().await.summary()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                ErrorCode::RoomNotFound,
                format!("room '{}' not found", room_id),
            )),
        )
            .into_response(),
    }
}

/// One agent command over request/response, limited per source address
pub async fn agent_command(
    Path(room_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    if let Err(e) = state.agent_limiter.check(peer.ip(), Instant::now()) {
        state.metrics.agent_http_limited.fetch_add(1, Ordering::Relaxed);
        debug!(%peer, error = %e, "agent request throttled");
        let outcome = CommandOutcome {
            detail: Some(e.to_string()),
            ..CommandOutcome::rejected(&CommandError::RateLimited { reset_in_ticks: 0 })
        };
        return respond(outcome);
    }

    let outcome = run_agent_command(&state, &room_id, &body).await;
    respond(outcome)
}

/// Persistent agent session bound to one room
pub async fn agent_ws(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.registry.get(&room_id).await.is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                ErrorCode::RoomNotFound,
                format!("room '{}' not found", room_id),
            )),
        )
            .into_response();
    }

    let span = info_span!("agent_conn", %peer, room_id = %room_id);
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, room_id).instrument(span))
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>, room_id: String) {
    info!("agent connected");
    let (mut sink, mut stream) = socket.split();
    let mut limiter = MessageLimiter::new(&state.dos);

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Binary(_) => {
                let outcome = CommandOutcome::rejected(&CommandError::Malformed(
                    "text frames only".to_string(),
                ));
                if send_outcome(&mut sink, &outcome).await.is_err() {
                    break;
                }
                continue;
            }
            _ => continue,
        };

        let outcome = match limiter.check(text.as_str().len(), Instant::now()) {
            Ok(()) => run_agent_command(&state, &room_id, text.as_str().as_bytes()).await,
            Err(e) => CommandOutcome {
                error: Some(e.code()),
                detail: Some(e.to_string()),
                ..CommandOutcome::rejected(&CommandError::RateLimited { reset_in_ticks: 0 })
            },
        };
        if send_outcome(&mut sink, &outcome).await.is_err() {
            break;
        }
    }
    info!("agent disconnected");
}

async fn send_outcome<S>(sink: &mut S, outcome: &CommandOutcome) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = serde_json::to_string(outcome).map_err(|e| {
        warn!(error = %e, "failed to serialize command outcome");
    })?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Resolve the room, decode the payload and apply it under the room lock
async fn run_agent_command(state: &AppState, room_id: &str, body: &[u8]) -> CommandOutcome {
    let Some(room) = state.registry.get(room_id).await else {
        state.metrics.record_command(false);
        return CommandOutcome::rejected(&CommandError::RoomNotFound);
    };

    let payload: serde_json::Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            state.metrics.record_command(false);
            return CommandOutcome::rejected(&CommandError::Malformed(e.to_string()));
        }
    };

    let outcome = room.write().await.agent_command(payload);
    state.metrics.record_command(outcome.ok);
    outcome
}

fn respond(outcome: CommandOutcome) -> Response {
    let status = match outcome.error {
        None => StatusCode::OK,
        Some(ErrorCode::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(ErrorCode::RoomNotFound) => StatusCode::NOT_FOUND,
        Some(ErrorCode::InvalidCommand) | Some(ErrorCode::InvalidUnit) => StatusCode::BAD_REQUEST,
        Some(_) => StatusCode::CONFLICT,
    };
    (status, Json(outcome)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let ok = CommandOutcome {
            ok: true,
            error: None,
            ..CommandOutcome::rejected(&CommandError::RoomNotFound)
        };
        assert_eq!(respond(ok).status(), StatusCode::OK);
        assert_eq!(
            respond(CommandOutcome::rejected(&CommandError::RoomNotFound)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            respond(CommandOutcome::rejected(&CommandError::Malformed("x".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            respond(CommandOutcome::rejected(&CommandError::AgentModeDisabled)).status(),
            StatusCode::CONFLICT
        );
    }
}
