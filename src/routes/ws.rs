//! WebSocket handlers for the tutor, whiteboard, and ephemeral classes.
//!
//! DESIGN
//! ======
//! Authentication runs before the upgrade: a missing or invalid token is
//! answered with 401 and no connection is ever registered.
//!
//! After the upgrade each connection registers an outbox with the session
//! registry and enters a `select!` loop:
//! - Inbound client frames → parse + dispatch by connection class
//! - Outbox frames from peers and background tasks → forward to client
//!
//! The registry holds the only strong outbox sender. When a broadcast
//! failure or the heartbeat monitor evicts the connection, the sender is
//! dropped, `recv` yields `None`, and the loop closes the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Authenticate → upgrade → attach to the registry
//! 2. Send `TUTOR_CONNECTED` (tutor) or hydration frames (canvas classes)
//! 3. Client frames → touch activity → dispatch → replies to the sender
//! 4. Close or eviction → detach (tears the session down if it was the last)

use std::collections::HashMap;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{CanvasInbound, Outbound, ServerMessage, TutorInbound, now_ms};
use crate::services::auth::extract_token;
use crate::services::registry::{ConnectionClass, ConnectionHandle};
use crate::services::{canvas, session, tutor};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /ws/tutor/{session_id}`
pub async fn tutor_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, ConnectionClass::Tutor, session_id, &headers, &params, ws).await
}

/// `GET /ws/v2/session/{session_id}/whiteboard`
pub async fn whiteboard_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, ConnectionClass::Whiteboard, session_id, &headers, &params, ws).await
}

/// `GET /ws/ephemeral/{session_id}`
pub async fn ephemeral_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, ConnectionClass::Ephemeral, session_id, &headers, &params, ws).await
}

async fn upgrade(
    state: AppState,
    class: ConnectionClass,
    session_id: String,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = extract_token(headers, params);
    let user_id = match state.auth.authenticate(token.as_deref()).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(%session_id, %class, error = %e, "ws: upgrade refused");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| run_connection(socket, state, session_id, user_id, class))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_connection(mut socket: WebSocket, state: AppState, session_id: String, user_id: String, class: ConnectionClass) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbox_capacity.max(1));
    let outbox = tx.downgrade();
    let handle = session::attach(&state, &session_id, &user_id, class, tx).await;

    let greeting = match class {
        ConnectionClass::Tutor => vec![tutor::connected(&handle, now_ms())],
        ConnectionClass::Whiteboard | ConnectionClass::Ephemeral => canvas::hydrate(&state, &handle, now_ms()).await,
    };
    let mut open = send_all(&mut socket, &greeting).await.is_ok();

    while open {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                state.registry.touch(&handle, now_ms()).await;
                match msg {
                    Message::Text(text) => {
                        let replies = dispatch_text(&state, &handle, &outbox, text.as_str()).await;
                        open = send_all(&mut socket, &replies).await.is_ok();
                    }
                    Message::Binary(bytes) => {
                        canvas::relay_binary(&state, &handle, bytes.to_vec()).await;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            outbound = rx.recv() => {
                let Some(outbound) = outbound else {
                    info!(%session_id, connection_id = %handle.id, "ws: connection evicted; closing");
                    let frame = CloseFrame { code: close_code::AWAY, reason: Utf8Bytes::from_static("evicted") };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                };
                open = send_outbound(&mut socket, outbound).await.is_ok();
            }
        }
    }

    session::detach(&state, &handle).await;
    info!(%session_id, connection_id = %handle.id, %user_id, %class, "ws: connection closed");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse one inbound text frame for the connection's class and return the
/// frames for the sender. Malformed frames are dropped with a warning.
async fn dispatch_text(
    state: &AppState,
    handle: &ConnectionHandle,
    outbox: &mpsc::WeakSender<Outbound>,
    text: &str,
) -> Vec<ServerMessage> {
    let now = now_ms();
    match handle.class {
        ConnectionClass::Tutor => match serde_json::from_str::<TutorInbound>(text) {
            Ok(message) => tutor::handle_message(state, handle, message, outbox, now).await,
            Err(e) => {
                warn!(session_id = %handle.session_id, connection_id = %handle.id, error = %e, "ws: malformed tutor frame dropped");
                Vec::new()
            }
        },
        ConnectionClass::Whiteboard | ConnectionClass::Ephemeral => match serde_json::from_str::<CanvasInbound>(text) {
            Ok(message) => canvas::handle_message(state, handle, message, now).await,
            Err(e) => {
                warn!(session_id = %handle.session_id, connection_id = %handle.id, error = %e, "ws: malformed canvas frame dropped");
                Vec::new()
            }
        },
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, messages: &[ServerMessage]) -> Result<(), axum::Error> {
    for message in messages {
        match Outbound::encode(message) {
            Ok(outbound) => {
                debug!(kind = message.kind(), "ws: send frame");
                send_outbound(socket, outbound).await?;
            }
            Err(e) => warn!(kind = message.kind(), error = %e, "ws: failed to serialize frame"),
        }
    }
    Ok(())
}

async fn send_outbound(socket: &mut WebSocket, outbound: Outbound) -> Result<(), axum::Error> {
    let message = match outbound {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Binary(bytes) => Message::Binary(bytes.into()),
    };
    socket.send(message).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
