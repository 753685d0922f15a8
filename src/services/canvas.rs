//! Canvas connection service: hydration and message handling for the
//! whiteboard and ephemeral connection classes.
//!
//! DESIGN
//! ======
//! Handler functions take the decoded inbound message and return the frames
//! for the sender. Fan-out to peers happens here through the session
//! module, so the route layer only moves bytes.
//!
//! Accepting a batch runs in a fixed order: ownership and validation,
//! then, under the session's sequencing hold, durable apply, snapshot
//! append and broadcast to whiteboard peers, then the ack. Any failure
//! before the append produces an error frame for the author and nothing
//! is broadcast.

use tracing::{debug, info, warn};

use crate::canvas::object::normalize_update;
use crate::canvas::translate::translate;
use crate::canvas::{ActionBatch, WhiteboardAction};
use crate::frame::{CanvasInbound, ErrorCode, Outbound, ServerMessage};
use crate::services::durable::{self, Applied, DurableError};
use crate::services::ephemeral;
use crate::services::registry::{BroadcastFilter, ConnectionClass, ConnectionHandle};
use crate::services::session;
use crate::services::snapshot::SnapshotError;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch contains no actions")]
    Empty,
    #[error("{0} connections cannot submit whiteboard batches")]
    WrongClass(ConnectionClass),
    #[error(transparent)]
    Durable(#[from] DurableError),
    #[error(transparent)]
    Log(#[from] SnapshotError),
}

impl ErrorCode for BatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_EMPTY_BATCH",
            Self::WrongClass(_) => "E_WRONG_CONNECTION_CLASS",
            Self::Durable(e) => e.error_code(),
            Self::Log(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Durable(e) => e.retryable(),
            Self::Log(e) => e.retryable(),
            _ => false,
        }
    }
}

/// A batch that made it into the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub batch_id: String,
    pub snapshot_index: i64,
    pub applied: Applied,
    pub delivered: usize,
}

// =============================================================================
// HYDRATION
// =============================================================================

/// Initial frames for a freshly attached canvas connection.
pub async fn hydrate(state: &AppState, handle: &ConnectionHandle, now_ms: i64) -> Vec<ServerMessage> {
    let mut frames = Vec::with_capacity(2);

    if handle.class == ConnectionClass::Whiteboard {
        let (Ok(frame) | Err(frame)) = whiteboard_state(state, &handle.session_id).await;
        frames.push(frame);
    }

    let objects = state.ephemeral.list_valid(&handle.session_id, now_ms).await;
    debug!(session_id = %handle.session_id, connection_id = %handle.id, ephemeral = objects.len(), "canvas: hydrated");
    frames.push(ServerMessage::EphemeralInitialState { objects });
    frames
}

async fn whiteboard_state(state: &AppState, session_id: &str) -> Result<ServerMessage, ServerMessage> {
    let objects = state.durable.list(session_id).await.map_err(|e| {
        warn!(%session_id, error = %e, "canvas: durable hydration failed");
        ServerMessage::error_from(&e)
    })?;
    let latest_snapshot_index = state.snapshots.latest_index(session_id).await.map_err(|e| {
        warn!(%session_id, error = %e, "canvas: latest snapshot lookup failed");
        ServerMessage::error_from(&e)
    })?;
    Ok(ServerMessage::WhiteboardState { actions: WhiteboardAction::hydration(objects), latest_snapshot_index })
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Handle one decoded inbound message and return the frames for the sender.
pub async fn handle_message(
    state: &AppState,
    handle: &ConnectionHandle,
    message: CanvasInbound,
    now_ms: i64,
) -> Vec<ServerMessage> {
    match message {
        CanvasInbound::Heartbeat => vec![ServerMessage::HeartbeatAck { timestamp: now_ms }],
        CanvasInbound::AddEphemeral { object } => match ephemeral::add(state, handle, object, now_ms).await {
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(session_id = %handle.session_id, connection_id = %handle.id, error = %e, "canvas: ephemeral object rejected");
                vec![ServerMessage::error_from(&e)]
            }
        },
        CanvasInbound::RemoveEphemeral { object_id } => {
            ephemeral::remove(state, handle, &object_id).await;
            Vec::new()
        }
        CanvasInbound::WhiteboardActions { batch_id, snapshot_index, actions } => {
            let batch = ActionBatch::new(batch_id, actions);
            vec![reply(accept_batch(state, handle, batch, snapshot_index, now_ms).await)]
        }
        CanvasInbound::SkillBatch { batch_id, operations } => {
            let translation = translate(&operations);
            if !translation.skipped.is_empty() {
                warn!(session_id = %handle.session_id, skipped = translation.skipped.len(), total = operations.len(), "canvas: skill batch partially translated");
            }
            let batch = ActionBatch::new(batch_id, translation.actions);
            vec![reply(accept_batch(state, handle, batch, None, now_ms).await)]
        }
        CanvasInbound::Unknown => {
            warn!(session_id = %handle.session_id, connection_id = %handle.id, "canvas: unknown message type ignored");
            Vec::new()
        }
    }
}

fn reply(result: Result<Accepted, BatchError>) -> ServerMessage {
    match result {
        Ok(accepted) => ServerMessage::BatchAccepted {
            batch_id: accepted.batch_id,
            snapshot_index: accepted.snapshot_index,
        },
        Err(e) => ServerMessage::error_from(&e),
    }
}

// =============================================================================
// BATCH ACCEPTANCE
// =============================================================================

/// Apply a batch to durable state, sequence it, and relay it to the
/// author's whiteboard peers.
///
/// # Errors
///
/// Empty batches, non-whiteboard authors, ownership and validation
/// failures, snapshot index conflicts, and storage failures.
pub async fn accept_batch(
    state: &AppState,
    author: &ConnectionHandle,
    batch: ActionBatch,
    snapshot_index: Option<i64>,
    now_ms: i64,
) -> Result<Accepted, BatchError> {
    if author.class != ConnectionClass::Whiteboard {
        return Err(BatchError::WrongClass(author.class));
    }
    if batch.actions.is_empty() {
        return Err(BatchError::Empty);
    }
    let session_id = author.session_id.as_str();

    let batch = ActionBatch { actions: sanitize_actions(batch.actions)?, ..batch };

    // One sequencing hold spans apply, append and relay, so log order,
    // durable order and peer delivery order agree.
    let sequence = state.snapshots.sequence(session_id).await;
    if let Some(requested) = snapshot_index {
        sequence.check_index(requested).await?;
    }

    let applied = state
        .durable
        .apply_actions(session_id, &author.user_id, &batch.actions)
        .await?;

    let snapshot_index = match snapshot_index {
        Some(index) => sequence.append_at(index, &batch, now_ms).await?,
        None => sequence.append(&batch, now_ms).await?,
    };

    let ActionBatch { batch_id, actions } = batch;
    let delivered = session::broadcast(
        state,
        session_id,
        &ServerMessage::WhiteboardActions {
            batch_id: batch_id.clone(),
            snapshot_index,
            user_id: author.user_id.clone(),
            actions,
        },
        Some(author.id),
        &BroadcastFilter::classes(&[ConnectionClass::Whiteboard]),
    )
    .await;
    drop(sequence);

    info!(%session_id, %batch_id, snapshot_index, user_id = %author.user_id, delivered, "canvas: batch accepted");
    Ok(Accepted { batch_id, snapshot_index, applied, delivered })
}

/// Rewrite client actions into what the server stores: added objects get
/// server-owned provenance and every object or update keeps only the
/// percentage coordinate on an axis that has one. The log and the
/// broadcast then carry exactly what was applied.
///
/// # Errors
///
/// `InvalidObject` or `EphemeralKind` for an added object that cannot be
/// stored.
pub fn sanitize_actions(actions: Vec<WhiteboardAction>) -> Result<Vec<WhiteboardAction>, DurableError> {
    actions
        .into_iter()
        .map(|action| match action {
            WhiteboardAction::AddObjects { objects } => Ok(WhiteboardAction::AddObjects {
                objects: objects
                    .into_iter()
                    .map(durable::prepare_user_object)
                    .collect::<Result<_, _>>()?,
            }),
            WhiteboardAction::UpdateObjects { objects } => Ok(WhiteboardAction::UpdateObjects {
                objects: objects
                    .into_iter()
                    .map(|mut update| {
                        normalize_update(&mut update.updates);
                        update
                    })
                    .collect(),
            }),
            other => Ok(other),
        })
        .collect()
}

// =============================================================================
// BINARY RELAY
// =============================================================================

/// Relay an opaque document-sync frame verbatim to the other whiteboard
/// connections of the session.
pub async fn relay_binary(state: &AppState, origin: &ConnectionHandle, payload: Vec<u8>) -> usize {
    if origin.class != ConnectionClass::Whiteboard {
        debug!(session_id = %origin.session_id, class = %origin.class, "canvas: binary frame ignored");
        return 0;
    }
    session::broadcast_outbound(
        state,
        &origin.session_id,
        &Outbound::Binary(payload),
        Some(origin.id),
        &BroadcastFilter::classes(&[ConnectionClass::Whiteboard]),
    )
    .await
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
