use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "embeddingModel": state.config.embedding_model,
        "embedderAvailable": state.embedder.is_available(),
        "tokenizerLoaded": state.tokenizer.is_some(),
        "llmKeys": state.generator.credential_count(),
        "backend": state.index.backend_name(),
    }))
}
