use super::test_helpers::*;
use super::*;
use crate::services::registry::ConnectionClass;

#[tokio::test]
async fn test_state_uses_memory_backends_and_no_llm() {
    let (state, backends) = test_app_state_with(ServerConfig::default(), None);
    assert!(state.llm.is_none());

    backends.ownership.assign("s1", "owner").await;
    assert!(state.durable.authorize("s1", "owner").await.is_ok());
    assert!(state.durable.authorize("s1", "other").await.is_err());
}

#[tokio::test]
async fn clones_share_the_same_registry() {
    let state = test_app_state();
    let clone = state.clone();
    let (_handle, _rx) = attach_client(&state, "s1", "u1", ConnectionClass::Tutor).await;
    assert_eq!(clone.registry.connection_count("s1").await, 1);
}

#[tokio::test]
async fn issued_tokens_authenticate() {
    let state = test_app_state();
    let token = issue_token("alice");
    assert_eq!(state.auth.authenticate(Some(&token)).await.unwrap(), "alice");
}

#[tokio::test]
async fn snapshot_page_limit_comes_from_config() {
    let config = ServerConfig { snapshot_page_limit_max: 1, ..ServerConfig::default() };
    let (state, _) = test_app_state_with(config, None);
    let batch = crate::canvas::ActionBatch::new(None, Vec::new());
    state.snapshots.append_batch("s1", &batch, 0).await.unwrap();
    state.snapshots.append_batch("s1", &batch, 0).await.unwrap();
    let page = state
        .snapshots
        .list("s1", crate::services::snapshot::SnapshotQuery { limit: Some(50), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
}
