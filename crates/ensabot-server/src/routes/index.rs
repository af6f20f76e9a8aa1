//! Index status and rebuild routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use super::error_response;
use crate::indexing::run_build;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/index/status", get(get_status))
        .route("/index/rebuild", post(rebuild))
}

/// GET /api/index/status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let collection = &state.config.index.collection;
    let available = match state.index.collection_exists(collection).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!("Index status check failed: {}", e);
            false
        }
    };
    let points = if available {
        state.index.count(collection).await.unwrap_or(0)
    } else {
        0
    };

    Json(serde_json::json!({
        "collection": collection,
        "available": available,
        "points": points,
        "backend": state.index.backend_name(),
    }))
}

/// POST /api/index/rebuild
async fn rebuild(State(state): State<Arc<AppState>>) -> Response {
    let Ok(_gate) = state.rebuild_gate.try_lock() else {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "Une reconstruction de l'index est déjà en cours.",
                "success": false,
            })),
        )
            .into_response();
    };

    info!("Index rebuild requested");
    let _guard = state.rebuild_lock.write().await;
    match run_build(&state).await {
        Ok(report) => Json(serde_json::json!({
            "indexed": report.indexed,
            "documents": report.documents,
            "skipped": report.skipped_documents,
            "chunksBeforeDedup": report.chunks_before_dedup,
            "success": true,
        }))
        .into_response(),
        Err(e) => {
            warn!("Index rebuild failed: {}", e);
            error_response(&e)
        }
    }
}
