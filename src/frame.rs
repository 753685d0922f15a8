//! Frame: the wire message types for every connection class.
//!
//! ARCHITECTURE
//! ============
//! Inbound traffic is a closed tagged union per connection class
//! (`TutorInbound`, `CanvasInbound`). Outbound traffic is one union,
//! `ServerMessage`, shared by both classes so the registry can serialize a
//! broadcast once and fan the same text out to every peer.
//!
//! DESIGN
//! ======
//! - Every union is tagged on `type`; fields are camelCase on the wire.
//! - Unknown inbound `type` values land in an `Unknown` variant that the
//!   dispatcher logs and ignores instead of failing the connection.
//! - Errors that can reach a client implement `ErrorCode` so the frame
//!   carries a grepable code and a retryable flag.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::canvas::{EphemeralObject, WhiteboardAction};

// =============================================================================
// CLOCK
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// INBOUND, TUTOR CLASS
// =============================================================================

/// Messages accepted on `/ws/tutor/{sessionId}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum TutorInbound {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "USER_MESSAGE")]
    UserMessage {
        text: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename = "STREAM_AI_RESPONSE")]
    StreamAiResponse {
        prompt: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(other)]
    Unknown,
}

// =============================================================================
// INBOUND, CANVAS CLASSES
// =============================================================================

/// JSON messages accepted on the whiteboard and ephemeral endpoints.
/// Binary frames bypass this type entirely and are relayed verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CanvasInbound {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "ADD_EPHEMERAL")]
    AddEphemeral { object: crate::canvas::CanvasObjectSpec },
    #[serde(rename = "REMOVE_EPHEMERAL")]
    RemoveEphemeral { object_id: String },
    #[serde(rename = "WHITEBOARD_ACTIONS")]
    WhiteboardActions {
        #[serde(default)]
        batch_id: Option<String>,
        #[serde(default)]
        snapshot_index: Option<i64>,
        actions: Vec<WhiteboardAction>,
    },
    /// Declarative operations, parsed one by one so a single malformed
    /// operation never sinks the rest of the batch.
    #[serde(rename = "SKILL_BATCH")]
    SkillBatch {
        #[serde(default)]
        batch_id: Option<String>,
        operations: Vec<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Every message the server writes to a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck { timestamp: i64 },

    // --- tutor class ---
    #[serde(rename = "TUTOR_CONNECTED")]
    TutorConnected { session_id: String, timestamp: i64 },
    #[serde(rename = "AI_STREAM_DELTA")]
    AiStreamDelta {
        delta: String,
        is_complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_response: Option<String>,
    },
    #[serde(rename = "AI_STREAM_ERROR")]
    AiStreamError { error: String },
    #[serde(rename = "USER_MESSAGE_RECEIVED")]
    UserMessageReceived { user_id: String, text: String, timestamp: i64 },

    // --- canvas classes ---
    #[serde(rename = "EPHEMERAL_INITIAL_STATE")]
    EphemeralInitialState { objects: Vec<EphemeralObject> },
    #[serde(rename = "EPHEMERAL_OBJECT_ADDED")]
    EphemeralObjectAdded { object: EphemeralObject },
    #[serde(rename = "EPHEMERAL_OBJECT_REMOVED")]
    EphemeralObjectRemoved { object_id: String },
    #[serde(rename = "EPHEMERAL_OBJECTS_EXPIRED")]
    EphemeralObjectsExpired { expired_ids: Vec<String> },
    /// Hydration for a newly attached whiteboard connection.
    #[serde(rename = "WHITEBOARD_STATE")]
    WhiteboardState { actions: Vec<WhiteboardAction>, latest_snapshot_index: i64 },
    /// An accepted batch, relayed to the author's peers.
    #[serde(rename = "WHITEBOARD_ACTIONS")]
    WhiteboardActions {
        batch_id: String,
        snapshot_index: i64,
        user_id: String,
        actions: Vec<WhiteboardAction>,
    },
    #[serde(rename = "BATCH_ACCEPTED")]
    BatchAccepted { batch_id: String, snapshot_index: i64 },

    // --- both ---
    #[serde(rename = "ERROR")]
    Error { code: String, message: String, retryable: bool },
}

impl ServerMessage {
    /// Build a structured error frame from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_owned(), message: err.to_string(), retryable: err.retryable() }
    }

    /// Wire name of the message, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::TutorConnected { .. } => "TUTOR_CONNECTED",
            Self::AiStreamDelta { .. } => "AI_STREAM_DELTA",
            Self::AiStreamError { .. } => "AI_STREAM_ERROR",
            Self::UserMessageReceived { .. } => "USER_MESSAGE_RECEIVED",
            Self::EphemeralInitialState { .. } => "EPHEMERAL_INITIAL_STATE",
            Self::EphemeralObjectAdded { .. } => "EPHEMERAL_OBJECT_ADDED",
            Self::EphemeralObjectRemoved { .. } => "EPHEMERAL_OBJECT_REMOVED",
            Self::EphemeralObjectsExpired { .. } => "EPHEMERAL_OBJECTS_EXPIRED",
            Self::WhiteboardState { .. } => "WHITEBOARD_STATE",
            Self::WhiteboardActions { .. } => "WHITEBOARD_ACTIONS",
            Self::BatchAccepted { .. } => "BATCH_ACCEPTED",
            Self::Error { .. } => "ERROR",
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// One item in a connection's outbox. Broadcasts are serialized once and
/// shared as text, so the outbox never re-encodes per peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

impl Outbound {
    /// Serialize a server message for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded as JSON.
    pub fn encode(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        serde_json::to_string(message).map(Self::Text)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
