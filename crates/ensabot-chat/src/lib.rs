//! Answer generation for ENSA Bot.
//!
//! Streams completions from an OpenAI-compatible endpoint (Groq by default),
//! trying each configured API key in order until one succeeds.

pub mod failover;
pub mod prompt;
pub mod providers;
pub mod types;

pub use failover::{failure_message, CancelHandle, CancelSignal, FailoverGenerator};
pub use prompt::display_sources;
pub use providers::{BoxedStream, CompletionBackend, HttpCompletionBackend, SseLineBuffer};
pub use types::*;
