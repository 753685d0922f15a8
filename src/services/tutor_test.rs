use super::*;
use crate::state::test_helpers::{attach_client, attach_client_weak, drain, test_app_state, test_app_state_with_llm};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, timeout};

/// Streams canned deltas, then succeeds or fails.
struct MockLlm {
    deltas: Vec<String>,
    fail_with: Option<String>,
    cancelled: AtomicBool,
}

impl MockLlm {
    fn replying(deltas: &[&str]) -> Self {
        Self { deltas: deltas.iter().map(|d| (*d).to_owned()).collect(), fail_with: None, cancelled: AtomicBool::new(false) }
    }

    fn failing_after(deltas: &[&str], error: &str) -> Self {
        Self { fail_with: Some(error.to_owned()), ..Self::replying(deltas) }
    }
}

#[async_trait::async_trait]
impl LlmStream for MockLlm {
    async fn stream(&self, _system: &str, _prompt: &str, sink: mpsc::Sender<String>) -> Result<String, LlmError> {
        let mut full = String::new();
        for delta in &self.deltas {
            if sink.send(delta.clone()).await.is_err() {
                self.cancelled.store(true, Ordering::SeqCst);
                return Err(LlmError::Cancelled);
            }
            full.push_str(delta);
        }
        match &self.fail_with {
            Some(error) => Err(LlmError::Upstream(error.clone())),
            None => Ok(full),
        }
    }
}

fn stream_request(prompt: &str) -> TutorInbound {
    TutorInbound::StreamAiResponse { prompt: prompt.into(), timestamp: None }
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn heartbeat_is_acked() {
    let state = test_app_state();
    let (handle, _rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;
    let frames = handle_message(&state, &handle, TutorInbound::Heartbeat, &weak, 77).await;
    assert_eq!(frames, vec![ServerMessage::HeartbeatAck { timestamp: 77 }]);
}

#[test]
fn connected_greeting_names_the_session() {
    let handle = ConnectionHandle {
        id: uuid::Uuid::new_v4(),
        session_id: "abc".into(),
        user_id: "u1".into(),
        class: ConnectionClass::Tutor,
    };
    assert_eq!(connected(&handle, 5), ServerMessage::TutorConnected { session_id: "abc".into(), timestamp: 5 });
}

#[tokio::test]
async fn user_message_is_recorded_and_relayed_to_other_tutor_connections() {
    let (state, backends) = test_app_state_with_llm(Arc::new(MockLlm::replying(&[])));
    let (alice, mut ra, weak) = attach_client_weak(&state, "s1", "alice", ConnectionClass::Tutor).await;
    let (_bob, mut rb) = attach_client(&state, "s1", "bob", ConnectionClass::Tutor).await;
    let (_board, mut rw) = attach_client(&state, "s1", "bob", ConnectionClass::Whiteboard).await;

    let message = TutorInbound::UserMessage { text: "what is 2+2?".into(), timestamp: Some(10) };
    assert!(handle_message(&state, &alice, message, &weak, 20).await.is_empty());

    assert!(drain(&mut ra).is_empty());
    assert!(drain(&mut rw).is_empty());
    assert_eq!(
        drain(&mut rb),
        vec![ServerMessage::UserMessageReceived { user_id: "alice".into(), text: "what is 2+2?".into(), timestamp: 10 }]
    );

    let transcript = backends.transcripts.list("s1").await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].created_at, 10);
}

#[tokio::test]
async fn blank_user_message_is_dropped() {
    let (state, backends) = test_app_state_with_llm(Arc::new(MockLlm::replying(&[])));
    let (alice, _ra, weak) = attach_client_weak(&state, "s1", "alice", ConnectionClass::Tutor).await;
    let message = TutorInbound::UserMessage { text: "   ".into(), timestamp: None };
    assert!(handle_message(&state, &alice, message, &weak, 0).await.is_empty());
    assert!(backends.transcripts.list("s1").await.unwrap().is_empty());
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn stream_without_llm_reports_error() {
    let state = test_app_state();
    let (handle, _rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;
    let frames = handle_message(&state, &handle, stream_request("hi"), &weak, 0).await;
    assert!(matches!(frames.as_slice(), [ServerMessage::AiStreamError { .. }]));
}

#[tokio::test]
async fn empty_prompt_reports_error() {
    let (state, _) = test_app_state_with_llm(Arc::new(MockLlm::replying(&["x"])));
    let (handle, _rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;
    let frames = handle_message(&state, &handle, stream_request(" "), &weak, 0).await;
    assert_eq!(frames, vec![ServerMessage::AiStreamError { error: "prompt required".into() }]);
}

#[tokio::test]
async fn completed_stream_sends_deltas_then_final_and_records_reply() {
    let llm = MockLlm::replying(&["Two ", "plus two ", "is four."]);
    let (state, backends) = test_app_state_with_llm(Arc::new(MockLlm::replying(&[])));
    let (handle, mut rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;
    let (_peer, mut rp) = attach_client(&state, "s1", "u2", ConnectionClass::Tutor).await;

    stream_reply(&state, &llm, &handle, "2+2?", &weak).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0], ServerMessage::AiStreamDelta { delta: "Two ".into(), is_complete: false, full_response: None });
    assert_eq!(
        frames[3],
        ServerMessage::AiStreamDelta {
            delta: String::new(),
            is_complete: true,
            full_response: Some("Two plus two is four.".into()),
        }
    );
    assert!(drain(&mut rp).is_empty(), "deltas go to the requester only");

    let transcript = backends.transcripts.list("s1").await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);
    assert_eq!(transcript[0].text, "Two plus two is four.");
    assert!(!transcript[0].is_partial);
}

#[tokio::test]
async fn upstream_failure_sends_error_and_keeps_partial_reply() {
    let llm = MockLlm::failing_after(&["Let me ", "think"], "overloaded");
    let (state, backends) = test_app_state_with_llm(Arc::new(MockLlm::replying(&[])));
    let (handle, mut rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;

    stream_reply(&state, &llm, &handle, "hard question", &weak).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 3);
    let ServerMessage::AiStreamError { error } = &frames[2] else {
        panic!("expected AI_STREAM_ERROR last, got {:?}", frames[2]);
    };
    assert!(error.contains("overloaded"));

    let transcript = backends.transcripts.list("s1").await.unwrap();
    assert_eq!(transcript[0].text, "Let me think");
    assert!(transcript[0].is_partial);
}

#[tokio::test]
async fn detached_consumer_cancels_upstream() {
    let many: Vec<String> = (0..200).map(|i| format!("t{i} ")).collect();
    let refs: Vec<&str> = many.iter().map(String::as_str).collect();
    let llm = MockLlm::replying(&refs);
    let (state, backends) = test_app_state_with_llm(Arc::new(MockLlm::replying(&[])));
    let (handle, rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;
    session::detach(&state, &handle).await;
    drop(rx);

    stream_reply(&state, &llm, &handle, "long answer", &weak).await;

    assert!(llm.cancelled.load(Ordering::SeqCst));
    let transcript = backends.transcripts.list("s1").await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].is_partial);
}

#[tokio::test]
async fn stream_request_runs_in_background() {
    let (state, _) = test_app_state_with_llm(Arc::new(MockLlm::replying(&["hello"])));
    let (handle, mut rx, weak) = attach_client_weak(&state, "s1", "u1", ConnectionClass::Tutor).await;

    assert!(handle_message(&state, &handle, stream_request("greet me"), &weak, 0).await.is_empty());

    let mut frames = Vec::new();
    while frames.len() < 2 {
        let outbound = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("stream frame timed out")
            .expect("outbox closed");
        let Outbound::Text(text) = outbound else {
            panic!("expected text frame");
        };
        frames.push(serde_json::from_str::<ServerMessage>(&text).unwrap());
    }
    assert!(matches!(&frames[1], ServerMessage::AiStreamDelta { is_complete: true, full_response: Some(full), .. } if full == "hello"));
}
