//! LLM types: the streaming trait and its errors.

use tokio::sync::mpsc;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// The required API key environment variable is not set.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    /// The HTTP request to the LLM provider failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The LLM provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// A stream event could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The provider reported an error in the middle of the stream.
    #[error("upstream stream error: {0}")]
    Upstream(String),

    /// The consumer dropped the delta sink before the stream finished.
    #[error("stream cancelled by consumer")]
    Cancelled,

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl crate::frame::ErrorCode for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::MissingApiKey { .. } => "E_MISSING_API_KEY",
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::Upstream(_) => "E_UPSTREAM",
            Self::Cancelled => "E_CANCELLED",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ApiRequest(_) | Self::Upstream(_) | Self::ApiResponse { status: 429 | 500..=599, .. }
        )
    }
}

// =============================================================================
// LLM STREAM TRAIT
// =============================================================================

/// Provider-neutral streaming completion. Enables mocking in tests.
#[async_trait::async_trait]
pub trait LlmStream: Send + Sync {
    /// Stream a completion for `prompt`, pushing each text delta into
    /// `sink`, and return the full text once the provider finishes.
    ///
    /// A closed `sink` means the consumer went away; implementations stop
    /// reading upstream and return `LlmError::Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request fails, the stream reports an
    /// error, or the consumer cancels.
    async fn stream(&self, system: &str, prompt: &str, sink: mpsc::Sender<String>) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ErrorCode;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::ApiRequest("reset".into()).retryable());
        assert!(LlmError::ApiResponse { status: 529, body: String::new() }.retryable());
        assert!(LlmError::ApiResponse { status: 429, body: String::new() }.retryable());
        assert!(!LlmError::ApiResponse { status: 400, body: String::new() }.retryable());
        assert!(!LlmError::Cancelled.retryable());
        assert!(!LlmError::MissingApiKey { var: "X".into() }.retryable());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(LlmError::Upstream("x".into()).error_code(), "E_UPSTREAM");
        assert_eq!(LlmError::ConfigParse("x".into()).error_code(), "E_CONFIG_PARSE");
    }
}
