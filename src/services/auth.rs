//! Connection authenticator: bearer token to user id.
//!
//! ARCHITECTURE
//! ============
//! Token verification is a collaborator behind the `TokenVerifier` trait.
//! The shipped verifier checks HS256 JWTs against a shared secret and uses
//! the `sub` claim as the user id. `Authenticator` adds the policy on top:
//! a missing token is always rejected, and a failed verification is only
//! forgiven when the development fallback is switched on.
//!
//! Nothing here touches session state; the caller decides whether to
//! upgrade the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::frame::ErrorCode;

/// User id substituted by the development fallback.
pub const DEV_FALLBACK_USER_ID: &str = "dev-user";

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("jwt secret must be at least {MIN_SECRET_LEN} characters long")]
    WeakSecret,
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "E_MISSING_TOKEN",
            Self::InvalidToken(_) => "E_INVALID_TOKEN",
            Self::Signing(_) => "E_TOKEN_SIGNING",
            Self::WeakSecret => "E_WEAK_SECRET",
        }
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a raw token to a user id.
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 JWT verifier. Also issues tokens for tooling and tests.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// # Errors
    ///
    /// Returns `WeakSecret` if the secret is shorter than 32 characters.
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Issue a token for `user_id` valid for `ttl_secs`.
    ///
    /// # Errors
    ///
    /// Returns `Signing` if encoding fails.
    pub fn issue(&self, user_id: &str, ttl_secs: i64) -> Result<String, AuthError> {
        self.issue_at(user_id, unix_now(), ttl_secs)
    }

    fn issue_at(&self, user_id: &str, issued_at: i64, ttl_secs: i64) -> Result<String, AuthError> {
        let claims = Claims { sub: user_id.to_owned(), iat: issued_at, exp: issued_at + ttl_secs };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| AuthError::Signing(e.to_string()))
    }
}

#[async_trait::async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(claims.sub)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(0)
}

// =============================================================================
// AUTHENTICATOR
// =============================================================================

pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    dev_fallback: bool,
}

impl Authenticator {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, dev_fallback: bool) -> Self {
        Self { verifier, dev_fallback }
    }

    /// Admit or reject a connection attempt.
    ///
    /// # Errors
    ///
    /// `MissingToken` when no credential was supplied; `InvalidToken` when
    /// verification fails and the development fallback is off.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<String, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        match self.verifier.verify(token).await {
            Ok(user_id) => Ok(user_id),
            Err(e) if self.dev_fallback => {
                warn!(error = %e, user_id = DEV_FALLBACK_USER_ID, "auth: verification failed; using development fallback user");
                Ok(DEV_FALLBACK_USER_ID.to_owned())
            }
            Err(e) => Err(e),
        }
    }
}

/// Pull a bearer token from the `Authorization` header, falling back to the
/// `token` query parameter (browsers cannot set headers on WS upgrades).
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| {
            let (scheme, token) = raw.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_owned())
        })
        .filter(|t| !t.is_empty());

    from_header.or_else(|| {
        query
            .get("token")
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
