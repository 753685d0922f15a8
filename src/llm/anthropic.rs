//! Anthropic Messages API streaming client.
//!
//! Thin HTTP wrapper for `/v1/messages` with `stream: true`. Event parsing
//! is a pure function for testability.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::config::LlmTimeouts;
use super::sse::{StreamEvent, pump};
use super::types::LlmError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

// =============================================================================
// CLIENT
// =============================================================================

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
}

impl AnthropicClient {
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the HTTP client cannot be constructed.
    pub fn new(api_key: String, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key })
    }

    pub async fn stream(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        prompt: &str,
        sink: &mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        let body = StreamRequest {
            model,
            max_tokens,
            system,
            messages: [WireMessage { role: "user", content: prompt }],
            stream: true,
        };

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        pump(response, sink, parse_event).await
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [WireMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_event(data: &str) -> Result<StreamEvent, LlmError> {
    let event: Value = serde_json::from_str(data).map_err(|e| LlmError::ApiParse(e.to_string()))?;
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();

    Ok(match event_type {
        "content_block_delta" => event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map_or(StreamEvent::Ignore, |text| StreamEvent::Delta(text.to_owned())),
        "message_stop" => StreamEvent::Done,
        "error" => StreamEvent::Error(
            event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned(),
        ),
        _ => StreamEvent::Ignore,
    })
}
