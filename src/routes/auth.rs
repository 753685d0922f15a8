//! Bearer authentication for HTTP routes.

use std::collections::HashMap;

use axum::extract::{FromRef, Query};
use axum::http::StatusCode;
use axum::http::request::Parts;
use tracing::warn;

use crate::services::auth::extract_token;
use crate::state::AppState;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user resolved from the bearer token.
/// Use as a handler parameter to require authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let token = extract_token(&parts.headers, &query);

        let app_state = AppState::from_ref(state);
        let user_id = app_state
            .auth
            .authenticate(token.as_deref())
            .await
            .map_err(|e| {
                warn!(path = %parts.uri.path(), error = %e, "auth: request rejected");
                StatusCode::UNAUTHORIZED
            })?;

        Ok(Self { user_id })
    }
}
