//! Server-sent events plumbing shared by the provider clients.
//!
//! Providers stream `data: <json>` lines. `SseDecoder` turns raw body
//! chunks into those payloads; `pump` drives a response body through a
//! provider-specific event parser and forwards text deltas to the sink.

use futures::StreamExt;
use tokio::sync::mpsc;

use super::types::LlmError;

/// One decoded provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
    Ignore,
}

/// Incremental `data:` line extractor. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return every complete `data:` payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_owned());
            }
        }
        payloads
    }
}

/// Read a streaming response to the end, forwarding deltas into `sink`.
/// Returns the concatenated text.
pub(super) async fn pump(
    response: reqwest::Response,
    sink: &mpsc::Sender<String>,
    parse: fn(&str) -> Result<StreamEvent, LlmError>,
) -> Result<String, LlmError> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::ApiResponse { status, body });
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut full = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| LlmError::ApiRequest(e.to_string()))?;
        for data in decoder.push(&chunk) {
            match parse(&data)? {
                StreamEvent::Delta(text) if text.is_empty() => {}
                StreamEvent::Delta(text) => {
                    full.push_str(&text);
                    if sink.send(text).await.is_err() {
                        return Err(LlmError::Cancelled);
                    }
                }
                StreamEvent::Done => return Ok(full),
                StreamEvent::Error(message) => return Err(LlmError::Upstream(message)),
                StreamEvent::Ignore => {}
            }
        }
    }

    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_lines() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b"event: x\ndata: {\"a\":1}\n\ndata: [DONE]\n");
        assert_eq!(out, vec![r#"{"a":1}"#.to_owned(), "[DONE]".to_owned()]);
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"te").is_empty());
        assert_eq!(decoder.push(b"xt\":\"hi\"}\r\n"), vec![r#"{"text":"hi"}"#.to_owned()]);
    }

    #[test]
    fn keeps_multibyte_characters_split_between_chunks() {
        let bytes = "data: héllo\n".as_bytes();
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..8]).is_empty());
        assert_eq!(decoder.push(&bytes[8..]), vec!["héllo".to_owned()]);
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\nid: 4\nevent: ping\n").is_empty());
    }
}
