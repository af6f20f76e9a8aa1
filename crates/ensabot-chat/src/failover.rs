//! Answer generation with ordered credential failover.
//!
//! Credentials are tried one at a time in configuration order. A key that
//! fails (rate limit, API error, transport error, idle timeout) hands over to
//! the next one, even if it already produced tokens. The caller sees exactly
//! one terminal event per request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::prompt::{
    answer_prompt, display_sources, with_sources_footer, ALL_KEYS_RATE_LIMITED,
    NO_CONTEXT_ANSWER, NO_CONTEXT_STREAM, REQUEST_FAILED,
};
use crate::providers::{CompletionBackend, HttpCompletionBackend};
use crate::types::{
    Answer, AnswerEvent, ChatMessage, GenerationError, GenerationParams, StreamChunk,
};
use ensabot_core::{Error, GenerationConfig, Result};
use ensabot_resolve::{QueryReasoner, RetrievedContext};

/// Requests cancellation of an in-flight generation.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by a generation; fires once its handle calls `cancel`.
/// Dropping the handle without cancelling never fires.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// User-facing message for the last failure once every key was tried.
pub fn failure_message(last: Option<&GenerationError>) -> String {
    match last {
        Some(GenerationError::RateLimited) => ALL_KEYS_RATE_LIMITED.to_string(),
        Some(GenerationError::Api { status, message }) => {
            format!("Erreur API: {} {}", status, message)
        }
        Some(GenerationError::Other(m)) => format!("Erreur lors de la génération: {}", m),
        None => REQUEST_FAILED.to_string(),
    }
}

pub struct FailoverGenerator {
    backend: Arc<dyn CompletionBackend>,
    credentials: Vec<String>,
    params: GenerationParams,
    idle_timeout: Duration,
}

impl FailoverGenerator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        credentials: Vec<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            backend,
            credentials,
            params,
            idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(
            Arc::new(HttpCompletionBackend::new(config.url.clone())),
            config.credentials.clone(),
            GenerationParams::from(config),
        )
        .with_idle_timeout(Duration::from_secs(config.timeout_secs.max(1)))
    }

    /// Maximum wait for the next chunk before the current key is abandoned.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Stream an answer grounded in `context`.
    ///
    /// Success ends with `Done` then `Sources`; failure ends with a single
    /// `Error`. An empty context yields only `NoContext`. A cancelled
    /// generation simply stops.
    pub fn generate(
        &self,
        query: &str,
        context: &RetrievedContext,
        cancel: CancelSignal,
    ) -> impl Stream<Item = AnswerEvent> + Send + 'static {
        let backend = self.backend.clone();
        let credentials = self.credentials.clone();
        let params = self.params.clone();
        let idle_timeout = self.idle_timeout;
        let empty = context.is_empty();
        let sources = display_sources(&context.sources);
        let messages = vec![ChatMessage::user(answer_prompt(&context.context, query))];
        let mut cancel = cancel;

        async_stream::stream! {
            if empty {
                yield AnswerEvent::no_context(NO_CONTEXT_STREAM);
                return;
            }

            let mut last_error: Option<GenerationError> = None;
            for (attempt, key) in credentials.iter().enumerate() {
                let mut upstream = backend.stream(key, messages.clone(), &params);
                let outcome = loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("Generation cancelled on key #{}", attempt + 1);
                            return;
                        }
                        next = tokio::time::timeout(idle_timeout, upstream.next()) => next,
                    };
                    match next {
                        Err(_) => break Err(GenerationError::Other(format!(
                            "no data received for {}s",
                            idle_timeout.as_secs()
                        ))),
                        Ok(None) | Ok(Some(StreamChunk::Done { .. })) => break Ok(()),
                        Ok(Some(StreamChunk::Token(content))) => {
                            yield AnswerEvent::Token { content };
                        }
                        Ok(Some(StreamChunk::Error(e))) => break Err(e),
                    }
                };

                match outcome {
                    Ok(()) => {
                        yield AnswerEvent::Done;
                        yield AnswerEvent::Sources { sources };
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "Key #{} of {} failed: {}",
                            attempt + 1,
                            credentials.len(),
                            e
                        );
                        last_error = Some(e);
                    }
                }
            }

            if credentials.is_empty() {
                warn!("No LLM credentials configured");
            }
            yield AnswerEvent::error(failure_message(last_error.as_ref()));
        }
    }

    /// Full answer with a `Sources:` footer. Tokens from a key that later
    /// failed are discarded.
    pub async fn answer(&self, query: &str, context: &RetrievedContext) -> Answer {
        if context.is_empty() {
            return Answer {
                response: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                success: false,
            };
        }

        let messages = vec![ChatMessage::user(answer_prompt(&context.context, query))];
        match self.collect_with_failover(messages, &self.params).await {
            Ok(text) => {
                let sources = display_sources(&context.sources);
                Answer {
                    response: with_sources_footer(&text, &sources),
                    sources,
                    success: true,
                }
            }
            Err(last) => Answer {
                response: failure_message(last.as_ref()),
                sources: Vec::new(),
                success: false,
            },
        }
    }

    /// One-shot deterministic completion of `prompt`, with the same failover.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let params = GenerationParams {
            temperature: 0.0,
            ..self.params.clone()
        };
        self.collect_with_failover(vec![ChatMessage::user(prompt)], &params)
            .await
            .map_err(|last| Error::Generation(failure_message(last.as_ref())))
    }

    async fn collect_with_failover(
        &self,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
    ) -> std::result::Result<String, Option<GenerationError>> {
        let mut last_error = None;
        for (attempt, key) in self.credentials.iter().enumerate() {
            let mut upstream = self.backend.stream(key, messages.clone(), params);
            let mut text = String::new();
            let outcome = loop {
                match tokio::time::timeout(self.idle_timeout, upstream.next()).await {
                    Err(_) => {
                        break Err(GenerationError::Other(format!(
                            "no data received for {}s",
                            self.idle_timeout.as_secs()
                        )))
                    }
                    Ok(None) | Ok(Some(StreamChunk::Done { .. })) => break Ok(()),
                    Ok(Some(StreamChunk::Token(t))) => text.push_str(&t),
                    Ok(Some(StreamChunk::Error(e))) => break Err(e),
                }
            };
            match outcome {
                Ok(()) => return Ok(text.trim().to_string()),
                Err(e) => {
                    warn!("Key #{} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl QueryReasoner for FailoverGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        FailoverGenerator::complete(self, prompt).await
    }
}
