//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the three websocket connection classes and the REST snapshot
//! surface under a single Axum router. Every route authenticates with the
//! same bearer token, from the `Authorization` header or `?token=`.

pub mod auth;
pub mod snapshots;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/tutor/{session_id}", get(ws::tutor_ws))
        .route("/ws/v2/session/{session_id}/whiteboard", get(ws::whiteboard_ws))
        .route("/ws/ephemeral/{session_id}", get(ws::ephemeral_ws))
        .route(
            "/api/sessions/{session_id}/snapshots",
            get(snapshots::list_snapshots)
                .post(snapshots::append_snapshot)
                .delete(snapshots::delete_snapshots),
        )
        .route("/api/sessions/{session_id}/snapshots/latest", get(snapshots::latest_snapshot))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
