//! Streaming client for OpenAI-compatible chat completion endpoints.
//!
//! Groq (the default) and OpenAI share the same request and SSE formats.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::types::{ChatMessage, GenerationError, GenerationParams, StreamChunk};

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Anything that can stream a chat completion with one credential.
pub trait CompletionBackend: Send + Sync {
    fn stream(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> BoxedStream;
}

/// One parsed line of an SSE completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Token(String),
    Done,
    /// Blank lines, comments, keep-alives and empty deltas.
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(parsed) => match parsed["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseLine::Token(content.to_string()),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}

/// Reassembles SSE lines from raw network chunks.
///
/// Bytes are kept until a full line has arrived, so a multibyte character
/// split across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, GenerationError>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8(raw).map_err(|e| {
                GenerationError::Other(format!("Invalid UTF-8 in stream: {}", e))
            }));
        }
        lines
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Map an unsuccessful HTTP status to a failure kind.
pub fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited
    } else {
        GenerationError::Api {
            status: status.as_u16(),
            message: body.to_string(),
        }
    }
}

/// reqwest-backed completion client.
pub struct HttpCompletionBackend {
    client: Client,
    url: String,
}

impl HttpCompletionBackend {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CompletionBackend for HttpCompletionBackend {
    fn stream(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> BoxedStream {
        Box::pin(stream_openai_compat(
            self.client.clone(),
            self.url.clone(),
            messages,
            params.clone(),
            api_key.to_string(),
        ))
    }
}

fn stream_openai_compat(
    client: Client,
    url: String,
    messages: Vec<ChatMessage>,
    params: GenerationParams,
    api_key: String,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    async_stream::stream! {
        let body = json!({
            "model": params.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_completion_tokens": params.max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, params.model);

        let response = match client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(GenerationError::Other(format!("Request failed: {}", e)));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(classify_status(status, &body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(GenerationError::Other(format!("Stream read error: {}", e)));
                    return;
                }
            };

            for line in buffer.push(&bytes) {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        yield StreamChunk::Error(e);
                        return;
                    }
                };
                match parse_sse_line(&line) {
                    SseLine::Token(content) => {
                        token_count += 1;
                        yield StreamChunk::Token(content);
                    }
                    SseLine::Done => {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }
                    SseLine::Skip => {}
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Bon"}}]}"#),
            SseLine::Token("Bon".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]\n"), SseLine::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {oops"), SseLine::Skip);
    }

    #[test]
    fn test_line_buffer_keeps_split_multibyte_char() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Génie\"}}]}\n";
        let bytes = line.as_bytes();
        // Split between the two bytes of 'é'
        let cut = line.find('é').unwrap() + 1;

        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(&bytes[..cut]).is_empty());
        assert_eq!(buffer.pending(), cut);
        let lines = buffer.push(&bytes[cut..]);
        assert_eq!(lines.len(), 1);
        let parsed = parse_sse_line(lines[0].as_ref().unwrap());
        assert_eq!(parsed, SseLine::Token("Génie".into()));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_line_buffer_rejects_invalid_utf8() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: \xff\xfe\n: ok\n");
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], Err(GenerationError::Other(_))));
        assert_eq!(lines[1].as_deref().unwrap(), ": ok\n");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GenerationError::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "invalid key"),
            GenerationError::Api {
                status: 401,
                message: "invalid key".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_error() {
        let backend = HttpCompletionBackend::new("http://127.0.0.1:1/v1/chat/completions");
        let params = GenerationParams {
            model: "m".into(),
            temperature: 0.0,
            max_tokens: 8,
        };
        let mut stream = backend.stream("k", vec![ChatMessage::user("salut")], &params);
        match stream.next().await {
            Some(StreamChunk::Error(GenerationError::Other(_))) => {}
            other => panic!("unexpected chunk: {:?}", other),
        }
    }
}
