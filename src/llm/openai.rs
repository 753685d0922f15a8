//! OpenAI-compatible Chat Completions streaming client.
//!
//! Works against any endpoint that speaks `/chat/completions` with
//! `stream: true` (OpenAI itself or a compatible gateway).

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::config::LlmTimeouts;
use super::sse::{StreamEvent, pump};
use super::types::LlmError;

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    /// # Errors
    ///
    /// Returns `HttpClientBuild` if the HTTP client cannot be constructed.
    pub fn new(api_key: String, base_url: String, timeouts: LlmTimeouts) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LlmError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, api_key, base_url: base_url.trim_end_matches('/').to_string() })
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
            messages: [
                WireMessage { role: "system", content: system },
                WireMessage { role: "user", content: prompt },
            ],
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest(e.to_string()))?;

        pump(response, sink, parse_event).await
    }
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [WireMessage<'a>; 2],
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn parse_event(data: &str) -> Result<StreamEvent, LlmError> {
    if data.trim() == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let event: Value = serde_json::from_str(data).map_err(|e| LlmError::ApiParse(e.to_string()))?;

    if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
        return Ok(StreamEvent::Error(message.to_owned()));
    }

    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map_or(StreamEvent::Ignore, |text| StreamEvent::Delta(text.to_owned())))
}
