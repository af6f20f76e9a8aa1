//! Question answering routes: retrieval followed by generation.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::{error_response, ApiJson};
use crate::state::AppState;
use ensabot_chat::CancelSignal;
use ensabot_core::{Result, RetrievalMode};
use ensabot_resolve::{validate_query, RetrievedContext};

type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Event, Infallible>> + Send>>;

/// Upper bound on `top_k` accepted from clients.
const MAX_TOP_K: usize = 20;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/query", post(query))
        .route("/query/stream", post(stream_query))
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub mode: Option<RetrievalMode>,
    #[serde(default, alias = "topK")]
    pub top_k: Option<usize>,
}

async fn retrieve(state: &AppState, query: &str, req: &QueryRequest) -> Result<RetrievedContext> {
    let top_k = req
        .top_k
        .unwrap_or(state.config.retrieval.top_k)
        .clamp(1, MAX_TOP_K);
    let mode = req.mode.unwrap_or(state.config.retrieval.mode);

    let _guard = state.rebuild_lock.read().await;
    state.retriever.search_with(query, top_k, mode).await
}

/// POST /api/query: full answer with a `Sources:` line. 503 when every
/// LLM key failed.
async fn query(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<QueryRequest>,
) -> Response {
    let start = Instant::now();
    let query = match validate_query(&req.query) {
        Ok(q) => q.to_string(),
        Err(e) => return error_response(&e),
    };

    let context = match retrieve(&state, &query, &req).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Retrieval failed: {}", e);
            return error_response(&e);
        }
    };

    let answer = state.generator.answer(&query, &context).await;
    info!(
        "Answered in {} ms ({} chunks, mode {:?}, success={})",
        start.elapsed().as_millis(),
        context.hits.len(),
        context.mode,
        answer.success
    );
    // Generation failed on every key; an empty context is a normal answer.
    if !answer.success && !context.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(answer)).into_response();
    }
    Json(answer).into_response()
}

/// POST /api/query/stream: SSE stream of answer events.
async fn stream_query(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<QueryRequest>,
) -> Response {
    let query = match validate_query(&req.query) {
        Ok(q) => q.to_string(),
        Err(e) => return error_response(&e),
    };

    let context = match retrieve(&state, &query, &req).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Retrieval failed: {}", e);
            return error_response(&e);
        }
    };

    // Client disconnects drop the stream, which stops generation.
    let events = state
        .generator
        .generate(&query, &context, CancelSignal::never());
    let stream: SseStream = Box::pin(events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
        Ok::<_, Infallible>(Event::default().data(data))
    }));

    Sse::new(stream).into_response()
}
