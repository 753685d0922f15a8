use super::*;
use serde_json::json;

use crate::canvas::{CanvasObjectSpec, ClearScope, ObjectKind};

// =============================================================================
// Inbound: tutor
// =============================================================================

#[test]
fn tutor_user_message_parses_camel_case() {
    let msg: TutorInbound = serde_json::from_value(json!({"type": "USER_MESSAGE", "text": "hi", "timestamp": 12})).unwrap();
    assert_eq!(msg, TutorInbound::UserMessage { text: "hi".into(), timestamp: Some(12) });
}

#[test]
fn tutor_stream_request_timestamp_is_optional() {
    let msg: TutorInbound = serde_json::from_value(json!({"type": "STREAM_AI_RESPONSE", "prompt": "explain"})).unwrap();
    assert_eq!(msg, TutorInbound::StreamAiResponse { prompt: "explain".into(), timestamp: None });
}

#[test]
fn tutor_unknown_type_is_captured() {
    let msg: TutorInbound = serde_json::from_value(json!({"type": "SOMETHING_NEW", "x": 1})).unwrap();
    assert_eq!(msg, TutorInbound::Unknown);
}

#[test]
fn tutor_heartbeat_parses() {
    let msg: TutorInbound = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
    assert_eq!(msg, TutorInbound::Heartbeat);
}

#[test]
fn tutor_missing_required_field_is_an_error() {
    assert!(serde_json::from_value::<TutorInbound>(json!({"type": "USER_MESSAGE"})).is_err());
}

// =============================================================================
// Inbound: canvas
// =============================================================================

#[test]
fn canvas_add_ephemeral_parses_object() {
    let msg: CanvasInbound = serde_json::from_value(json!({
        "type": "ADD_EPHEMERAL",
        "object": {"id": "p1", "kind": "pointer_ping", "x": 10, "y": 20}
    }))
    .unwrap();
    let CanvasInbound::AddEphemeral { object } = msg else {
        panic!("expected ADD_EPHEMERAL");
    };
    assert_eq!(object.id, "p1");
    assert_eq!(object.kind, ObjectKind::PointerPing);
}

#[test]
fn canvas_remove_ephemeral_uses_object_id() {
    let msg: CanvasInbound = serde_json::from_value(json!({"type": "REMOVE_EPHEMERAL", "objectId": "p1"})).unwrap();
    assert!(matches!(msg, CanvasInbound::RemoveEphemeral { object_id } if object_id == "p1"));
}

#[test]
fn canvas_whiteboard_actions_parses_batch() {
    let msg: CanvasInbound = serde_json::from_value(json!({
        "type": "WHITEBOARD_ACTIONS",
        "batchId": "b-1",
        "actions": [{"type": "CLEAR_CANVAS", "scope": "tables"}]
    }))
    .unwrap();
    let CanvasInbound::WhiteboardActions { batch_id, snapshot_index, actions } = msg else {
        panic!("expected WHITEBOARD_ACTIONS");
    };
    assert_eq!(batch_id.as_deref(), Some("b-1"));
    assert_eq!(snapshot_index, None);
    assert_eq!(actions, vec![WhiteboardAction::ClearCanvas { scope: ClearScope::Tables }]);
}

#[test]
fn canvas_skill_batch_keeps_operations_raw() {
    let msg: CanvasInbound = serde_json::from_value(json!({
        "type": "SKILL_BATCH",
        "operations": [{"type": "add_text", "text": "x"}, 7]
    }))
    .unwrap();
    let CanvasInbound::SkillBatch { operations, .. } = msg else {
        panic!("expected SKILL_BATCH");
    };
    assert_eq!(operations.len(), 2);
}

#[test]
fn canvas_unknown_type_is_captured() {
    let msg: CanvasInbound = serde_json::from_value(json!({"type": "CURSOR_MOVE"})).unwrap();
    assert!(matches!(msg, CanvasInbound::Unknown));
}

// =============================================================================
// Outbound
// =============================================================================

#[test]
fn outbound_wire_names_match_kind() {
    let messages = vec![
        ServerMessage::HeartbeatAck { timestamp: 1 },
        ServerMessage::TutorConnected { session_id: "s".into(), timestamp: 1 },
        ServerMessage::AiStreamDelta { delta: "a".into(), is_complete: false, full_response: None },
        ServerMessage::AiStreamError { error: "boom".into() },
        ServerMessage::UserMessageReceived { user_id: "u".into(), text: "t".into(), timestamp: 1 },
        ServerMessage::EphemeralInitialState { objects: vec![] },
        ServerMessage::EphemeralObjectRemoved { object_id: "p".into() },
        ServerMessage::EphemeralObjectsExpired { expired_ids: vec!["p".into()] },
        ServerMessage::WhiteboardState { actions: vec![], latest_snapshot_index: -1 },
        ServerMessage::BatchAccepted { batch_id: "b".into(), snapshot_index: 0 },
        ServerMessage::Error { code: "E".into(), message: "m".into(), retryable: false },
    ];
    for msg in messages {
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.kind(), "wire tag mismatch for {msg:?}");
    }
}

#[test]
fn stream_delta_omits_full_response_until_complete() {
    let partial = serde_json::to_value(ServerMessage::AiStreamDelta {
        delta: "Hel".into(),
        is_complete: false,
        full_response: None,
    })
    .unwrap();
    assert_eq!(partial, json!({"type": "AI_STREAM_DELTA", "delta": "Hel", "isComplete": false}));

    let done = serde_json::to_value(ServerMessage::AiStreamDelta {
        delta: String::new(),
        is_complete: true,
        full_response: Some("Hello".into()),
    })
    .unwrap();
    assert_eq!(done["fullResponse"], "Hello");
    assert_eq!(done["isComplete"], true);
}

#[test]
fn ephemeral_added_serializes_object_inline() {
    let spec = CanvasObjectSpec::new("p1", ObjectKind::PointerPing);
    let object = EphemeralObject::stamp(spec, "u1", 1_000).unwrap();
    let value = serde_json::to_value(ServerMessage::EphemeralObjectAdded { object }).unwrap();
    assert_eq!(value["object"]["id"], "p1");
    assert_eq!(value["object"]["metadata"]["ownerId"], "u1");
    assert_eq!(value["object"]["metadata"]["expiresAt"], 4_000);
}

#[test]
fn whiteboard_state_uses_latest_snapshot_index_key() {
    let value = serde_json::to_value(ServerMessage::WhiteboardState { actions: vec![], latest_snapshot_index: 3 }).unwrap();
    assert_eq!(value["latestSnapshotIndex"], 3);
}

#[derive(Debug, thiserror::Error)]
#[error("store unavailable")]
struct Flaky;

impl ErrorCode for Flaky {
    fn error_code(&self) -> &'static str {
        "E_FLAKY"
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[test]
fn error_from_carries_code_message_and_retryable() {
    let msg = ServerMessage::error_from(&Flaky);
    assert_eq!(
        msg,
        ServerMessage::Error { code: "E_FLAKY".into(), message: "store unavailable".into(), retryable: true }
    );
}

#[test]
fn outbound_encode_produces_text() {
    let Outbound::Text(text) = Outbound::encode(&ServerMessage::HeartbeatAck { timestamp: 5 }).unwrap() else {
        panic!("expected text");
    };
    assert_eq!(text, r#"{"type":"heartbeat_ack","timestamp":5}"#);
}

#[test]
fn now_ms_is_positive() {
    assert!(now_ms() > 1_600_000_000_000);
}
