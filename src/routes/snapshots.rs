//! Snapshot replay routes: the timeline scrubber's query surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::canvas::{ActionBatch, WhiteboardAction};
use crate::frame::now_ms;
use crate::routes::auth::AuthUser;
use crate::services::canvas::sanitize_actions;
use crate::services::durable::DurableError;
use crate::services::snapshot::{SnapshotError, SnapshotQuery, SnapshotRecord};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSnapshotBody {
    pub actions: Vec<WhiteboardAction>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub snapshot_index: Option<i64>,
}

/// `GET /api/sessions/{id}/snapshots`: ascending replay page.
pub async fn list_snapshots(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<Vec<SnapshotRecord>>, StatusCode> {
    authorize(&state, &session_id, &auth).await?;
    let records = state
        .snapshots
        .list(&session_id, query)
        .await
        .map_err(snapshot_error_to_status)?;
    Ok(Json(records))
}

/// `GET /api/sessions/{id}/snapshots/latest`: high-water mark, `-1` if empty.
pub async fn latest_snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &session_id, &auth).await?;
    let latest = state
        .snapshots
        .latest_index(&session_id)
        .await
        .map_err(snapshot_error_to_status)?;
    Ok(Json(json!({ "latestIndex": latest })))
}

/// `POST /api/sessions/{id}/snapshots`: record a batch in the log.
pub async fn append_snapshot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
    Json(body): Json<AppendSnapshotBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.actions.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    authorize(&state, &session_id, &auth).await?;

    let actions = sanitize_actions(body.actions).map_err(durable_error_to_status)?;
    let batch = ActionBatch::new(body.batch_id, actions);
    let now = now_ms();
    let index = match body.snapshot_index {
        Some(index) => state.snapshots.append_at(&session_id, index, &batch, now).await,
        None => state.snapshots.append_batch(&session_id, &batch, now).await,
    }
    .map_err(snapshot_error_to_status)?;

    info!(%session_id, user_id = %auth.user_id, snapshot_index = index, batch_id = %batch.batch_id, "snapshots: appended via http");
    Ok(Json(json!({ "snapshotIndex": index, "batchId": batch.batch_id })))
}

/// `DELETE /api/sessions/{id}/snapshots`: explicit history teardown.
pub async fn delete_snapshots(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &session_id, &auth).await?;
    let deleted = state
        .snapshots
        .delete_session(&session_id)
        .await
        .map_err(snapshot_error_to_status)?;
    info!(%session_id, user_id = %auth.user_id, deleted, "snapshots: history deleted");
    Ok(Json(json!({ "deleted": deleted })))
}

async fn authorize(state: &AppState, session_id: &str, auth: &AuthUser) -> Result<(), StatusCode> {
    state
        .durable
        .authorize(session_id, &auth.user_id)
        .await
        .map_err(durable_error_to_status)
}

pub(crate) fn durable_error_to_status(err: DurableError) -> StatusCode {
    match err {
        DurableError::Forbidden { .. } => {
            warn!(error = %err, "snapshots: forbidden");
            StatusCode::FORBIDDEN
        }
        DurableError::NotFound(_) => StatusCode::NOT_FOUND,
        DurableError::EphemeralKind(_) | DurableError::InvalidObject(_) => StatusCode::BAD_REQUEST,
        DurableError::Storage(e) => {
            error!(error = %e, "snapshots: ownership lookup failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub(crate) fn snapshot_error_to_status(err: SnapshotError) -> StatusCode {
    match err {
        SnapshotError::InvalidIndex(_) => StatusCode::BAD_REQUEST,
        SnapshotError::IndexGap { .. } => StatusCode::CONFLICT,
        SnapshotError::Encode(e) => {
            error!(error = %e, "snapshots: encode failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SnapshotError::Storage(e) => {
            error!(error = %e, "snapshots: storage failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
