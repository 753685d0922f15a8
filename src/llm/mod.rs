//! LLM: multi-provider streaming adapter for the tutor connection class.
//!
//! DESIGN
//! ======
//! Uses environment variables instead of config files. `LlmClient`
//! dispatches to Anthropic or an OpenAI-compatible endpoint based on
//! `LLM_PROVIDER`. Callers depend on the `LlmStream` trait so tests can
//! substitute a scripted stream.

pub mod anthropic;
pub mod config;
pub mod openai;
pub mod sse;
pub mod types;

use tokio::sync::mpsc;

use config::{LlmConfig, LlmProviderKind};
pub use types::{LlmError, LlmStream};

// =============================================================================
// CLIENT DISPATCH
// =============================================================================

/// Concrete LLM client that dispatches to either Anthropic or OpenAI.
///
/// Configured from environment variables by [`LlmClient::from_env`].
pub struct LlmClient {
    inner: LlmProvider,
    model: String,
    max_tokens: u32,
}

enum LlmProvider {
    Anthropic(anthropic::AnthropicClient),
    OpenAi(openai::OpenAiClient),
}

impl LlmClient {
    /// Build an LLM client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client fails.
    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env()?;
        Self::from_config(config)
    }

    /// Build an LLM client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider HTTP client fails to build.
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        let inner = match config.provider {
            LlmProviderKind::Anthropic => {
                LlmProvider::Anthropic(anthropic::AnthropicClient::new(config.api_key, config.timeouts)?)
            }
            LlmProviderKind::OpenAi => LlmProvider::OpenAi(openai::OpenAiClient::new(
                config.api_key,
                config.openai_base_url,
                config.timeouts,
            )?),
        };
        Ok(Self { inner, model: config.model, max_tokens: config.max_tokens })
    }

    /// Return the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmStream for LlmClient {
    async fn stream(&self, system: &str, prompt: &str, sink: mpsc::Sender<String>) -> Result<String, LlmError> {
        match &self.inner {
            LlmProvider::Anthropic(c) => {
                c.stream(&self.model, self.max_tokens, system, prompt, &sink)
                    .await
            }
            LlmProvider::OpenAi(c) => {
                c.stream(&self.model, self.max_tokens, system, prompt, &sink)
                    .await
            }
        }
    }
}
