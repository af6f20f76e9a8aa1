//! Answer generation types and the streamed event format.

use serde::{Deserialize, Serialize};

use ensabot_core::GenerationConfig;

/// Chat message sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: usize,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Why a single credential's attempt failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("rate limit reached")]
    RateLimited,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

/// A single item read from the completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(GenerationError),
}

/// Event delivered to the client while an answer is generated.
///
/// Serialized as `{"type": "...", ...}`; the server frames each one as an
/// SSE `data:` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    Token { content: String },
    Done,
    Sources { sources: Vec<String> },
    /// Terminal failure after every credential was tried.
    Error { content: String, done: bool },
    /// Nothing relevant was retrieved; no generation happened.
    NoContext { content: String, done: bool },
}

impl AnswerEvent {
    pub fn error(content: impl Into<String>) -> Self {
        AnswerEvent::Error {
            content: content.into(),
            done: true,
        }
    }

    pub fn no_context(content: impl Into<String>) -> Self {
        AnswerEvent::NoContext {
            content: content.into(),
            done: true,
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnswerEvent::Sources { .. } | AnswerEvent::Error { .. } | AnswerEvent::NoContext { .. }
        )
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("data: {}\n\n", json)
    }
}

/// Complete, non-streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub response: String,
    pub sources: Vec<String>,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let token = AnswerEvent::Token {
            content: "Bonjour".into(),
        };
        assert_eq!(
            token.to_sse(),
            "data: {\"type\":\"token\",\"content\":\"Bonjour\"}\n\n"
        );
        assert_eq!(AnswerEvent::Done.to_sse(), "data: {\"type\":\"done\"}\n\n");

        let json = serde_json::to_value(AnswerEvent::Sources {
            sources: vec!["gi2.json".into()],
        })
        .unwrap();
        assert_eq!(json["type"], "sources");
        assert_eq!(json["sources"][0], "gi2.json");

        let json = serde_json::to_value(AnswerEvent::error("Erreur API: 500")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["done"], true);

        let json = serde_json::to_value(AnswerEvent::no_context("rien")).unwrap();
        assert_eq!(json["type"], "no_context");
    }

    #[test]
    fn test_terminal_events() {
        assert!(!AnswerEvent::Done.is_terminal());
        assert!(!AnswerEvent::Token { content: "x".into() }.is_terminal());
        assert!(AnswerEvent::Sources { sources: vec![] }.is_terminal());
        assert!(AnswerEvent::error("x").is_terminal());
    }

    #[test]
    fn test_params_from_config() {
        let params = GenerationParams::from(&GenerationConfig::default());
        assert_eq!(params.model, "llama-3.3-70b-versatile");
        assert_eq!(params.max_tokens, 1500);
    }
}
