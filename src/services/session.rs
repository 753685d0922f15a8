//! Session lifecycle: attach, detach, broadcast, and teardown cascade.
//!
//! ARCHITECTURE
//! ============
//! The registry only tracks membership. This module wraps it so that any
//! path that empties a session (client close, heartbeat eviction, a failed
//! broadcast send) releases the session-scoped state held elsewhere:
//! the ephemeral map, the durable hydration cache, and the sequencer lock.
//! Persisted durable objects and snapshots are never touched here.

use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::frame::{Outbound, ServerMessage, now_ms};
use crate::services::registry::{BroadcastFilter, ConnectionClass, ConnectionHandle, Detached};
use crate::state::AppState;

/// Register a connection in the session registry.
pub async fn attach(
    state: &AppState,
    session_id: &str,
    user_id: &str,
    class: ConnectionClass,
    tx: mpsc::Sender<Outbound>,
) -> ConnectionHandle {
    state
        .registry
        .attach(session_id, user_id, class, tx, now_ms())
        .await
}

/// Remove a connection and tear the session down if it was the last one.
pub async fn detach(state: &AppState, handle: &ConnectionHandle) -> Detached {
    let detached = state.registry.detach(handle).await;
    if detached.session_emptied {
        teardown(state, &handle.session_id).await;
    }
    detached
}

/// Serialize once and fan out to the session's peers. Returns the number of
/// connections that accepted the message.
pub async fn broadcast(
    state: &AppState,
    session_id: &str,
    message: &ServerMessage,
    origin: Option<Uuid>,
    filter: &BroadcastFilter,
) -> usize {
    let outbound = match Outbound::encode(message) {
        Ok(outbound) => outbound,
        Err(e) => {
            error!(%session_id, kind = message.kind(), error = %e, "session: failed to encode broadcast");
            return 0;
        }
    };
    broadcast_outbound(state, session_id, &outbound, origin, filter).await
}

/// Fan out an already-encoded message (used for opaque binary relay).
pub async fn broadcast_outbound(
    state: &AppState,
    session_id: &str,
    outbound: &Outbound,
    origin: Option<Uuid>,
    filter: &BroadcastFilter,
) -> usize {
    let report = state
        .registry
        .broadcast(session_id, outbound, origin, filter)
        .await;
    if report.session_emptied {
        teardown(state, session_id).await;
    }
    report.delivered
}

/// Release every session-scoped in-memory resource. A connection that
/// raced in after the session emptied keeps the state alive; one that
/// attaches during the purge waits for it and starts clean.
pub async fn teardown(state: &AppState, session_id: &str) {
    let Some(vacancy) = state.registry.vacancy(session_id).await else {
        return;
    };
    let purged = state.ephemeral.purge_session(session_id).await;
    drop(vacancy);
    // Durable writes go straight to the store; a joiner racing this
    // eviction only reloads.
    state.durable.evict(session_id).await;
    info!(%session_id, ephemeral_purged = purged, "session: torn down");
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
