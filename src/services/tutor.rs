//! Tutor connection service: chat relay and AI response streaming.
//!
//! DESIGN
//! ======
//! `USER_MESSAGE` is recorded in the transcript and relayed to the other
//! tutor connections of the session. `STREAM_AI_RESPONSE` spawns a task
//! that pumps deltas from the LLM collaborator to the requesting
//! connection only, so the connection loop keeps answering heartbeats
//! while a reply streams.
//!
//! The streaming task writes through a weak outbox handle. Once the
//! registry drops the connection, the upgrade fails, the delta channel
//! closes, and the LLM client stops reading upstream.
//!
//! TRADE-OFFS
//! ==========
//! Deltas are forwarded with `send().await` rather than `try_send`, so a
//! slow reader throttles its own stream instead of losing tokens.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::frame::{Outbound, ServerMessage, TutorInbound};
use crate::llm::{LlmError, LlmStream};
use crate::services::registry::{BroadcastFilter, ConnectionClass, ConnectionHandle};
use crate::services::session;
use crate::services::transcript::{Role, TranscriptEntry, TranscriptStore};
use crate::state::AppState;

const TUTOR_SYSTEM_PROMPT: &str = "You are a patient tutor working through problems with a student on a shared \
whiteboard. Explain step by step, check understanding with short questions, and keep answers concise.";

const DELTA_CHANNEL_CAPACITY: usize = 64;

/// Greeting sent once a tutor connection is attached.
#[must_use]
pub fn connected(handle: &ConnectionHandle, now_ms: i64) -> ServerMessage {
    ServerMessage::TutorConnected { session_id: handle.session_id.clone(), timestamp: now_ms }
}

/// Handle one decoded inbound message and return the frames for the sender.
/// Streamed AI deltas are delivered later through `outbox`.
pub async fn handle_message(
    state: &AppState,
    handle: &ConnectionHandle,
    message: TutorInbound,
    outbox: &mpsc::WeakSender<Outbound>,
    now_ms: i64,
) -> Vec<ServerMessage> {
    match message {
        TutorInbound::Heartbeat => vec![ServerMessage::HeartbeatAck { timestamp: now_ms }],
        TutorInbound::UserMessage { text, timestamp } => user_message(state, handle, text, timestamp.unwrap_or(now_ms)).await,
        TutorInbound::StreamAiResponse { prompt, .. } => {
            let Some(llm) = state.llm.clone() else {
                return vec![ServerMessage::AiStreamError { error: "AI features not configured".into() }];
            };
            if prompt.trim().is_empty() {
                return vec![ServerMessage::AiStreamError { error: "prompt required".into() }];
            }
            spawn_stream(state.clone(), llm, handle.clone(), prompt, outbox.clone());
            Vec::new()
        }
        TutorInbound::Unknown => {
            warn!(session_id = %handle.session_id, connection_id = %handle.id, "tutor: unknown message type ignored");
            Vec::new()
        }
    }
}

// =============================================================================
// CHAT
// =============================================================================

async fn user_message(state: &AppState, handle: &ConnectionHandle, text: String, timestamp: i64) -> Vec<ServerMessage> {
    if text.trim().is_empty() {
        warn!(session_id = %handle.session_id, connection_id = %handle.id, "tutor: empty user message dropped");
        return Vec::new();
    }

    let entry = TranscriptEntry::new(&handle.session_id, &handle.user_id, Role::User, text.clone(), timestamp);
    if let Err(e) = state.transcripts.append(&entry).await {
        error!(session_id = %handle.session_id, error = %e, "tutor: failed to record user message");
        return vec![ServerMessage::error_from(&e)];
    }

    let delivered = session::broadcast(
        state,
        &handle.session_id,
        &ServerMessage::UserMessageReceived { user_id: handle.user_id.clone(), text, timestamp },
        Some(handle.id),
        &BroadcastFilter::classes(&[ConnectionClass::Tutor]),
    )
    .await;
    info!(session_id = %handle.session_id, user_id = %handle.user_id, delivered, "tutor: user message relayed");
    Vec::new()
}

// =============================================================================
// STREAMING
// =============================================================================

/// Spawn the streaming task for one AI reply.
pub fn spawn_stream(
    state: AppState,
    llm: Arc<dyn LlmStream>,
    handle: ConnectionHandle,
    prompt: String,
    outbox: mpsc::WeakSender<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        stream_reply(&state, llm.as_ref(), &handle, &prompt, &outbox).await;
    })
}

/// Stream one reply to the requesting connection and record it.
pub async fn stream_reply(
    state: &AppState,
    llm: &dyn LlmStream,
    handle: &ConnectionHandle,
    prompt: &str,
    outbox: &mpsc::WeakSender<Outbound>,
) {
    info!(session_id = %handle.session_id, connection_id = %handle.id, prompt_len = prompt.len(), "tutor: streaming reply");
    let (delta_tx, mut delta_rx) = mpsc::channel::<String>(DELTA_CHANNEL_CAPACITY);

    let forward_to = outbox.clone();
    let forward = async move {
        let mut received = String::new();
        while let Some(delta) = delta_rx.recv().await {
            received.push_str(&delta);
            let frame = ServerMessage::AiStreamDelta { delta, is_complete: false, full_response: None };
            if !send_to(&forward_to, &frame).await {
                break;
            }
        }
        received
    };

    let (result, received) = tokio::join!(llm.stream(TUTOR_SYSTEM_PROMPT, prompt, delta_tx), forward);

    match result {
        Ok(full) => {
            let done = ServerMessage::AiStreamDelta {
                delta: String::new(),
                is_complete: true,
                full_response: Some(full.clone()),
            };
            send_to(outbox, &done).await;
            record_reply(state, handle, full, false).await;
            info!(session_id = %handle.session_id, connection_id = %handle.id, "tutor: reply complete");
        }
        Err(LlmError::Cancelled) => {
            info!(session_id = %handle.session_id, connection_id = %handle.id, received = received.len(), "tutor: reply cancelled by disconnect");
            record_reply(state, handle, received, true).await;
        }
        Err(e) => {
            warn!(session_id = %handle.session_id, connection_id = %handle.id, error = %e, received = received.len(), "tutor: upstream stream failed");
            send_to(outbox, &ServerMessage::AiStreamError { error: e.to_string() }).await;
            record_reply(state, handle, received, true).await;
        }
    }
}

async fn record_reply(state: &AppState, handle: &ConnectionHandle, text: String, partial: bool) {
    if text.is_empty() {
        return;
    }
    let mut entry = TranscriptEntry::new(&handle.session_id, &handle.user_id, Role::Assistant, text, crate::frame::now_ms());
    if partial {
        entry = entry.partial();
    }
    if let Err(e) = state.transcripts.append(&entry).await {
        error!(session_id = %handle.session_id, error = %e, "tutor: failed to record assistant reply");
    }
}

/// Deliver to the connection if it is still attached.
async fn send_to(outbox: &mpsc::WeakSender<Outbound>, message: &ServerMessage) -> bool {
    let Some(tx) = outbox.upgrade() else {
        return false;
    };
    match Outbound::encode(message) {
        Ok(outbound) => tx.send(outbound).await.is_ok(),
        Err(e) => {
            error!(kind = message.kind(), error = %e, "tutor: failed to encode frame");
            false
        }
    }
}

#[cfg(test)]
#[path = "tutor_test.rs"]
mod tests;
