//! Index (re)builds from the configured data root.

use std::sync::Arc;

use tracing::{error, info};

use crate::state::AppState;
use ensabot_core::Result;
use ensabot_ingest::BuildReport;

/// Rebuild the collection, waiting for in-flight queries to finish first.
pub async fn rebuild(state: &AppState) -> Result<BuildReport> {
    let _gate = state.rebuild_gate.lock().await;
    let _guard = state.rebuild_lock.write().await;
    run_build(state).await
}

/// Build once if the collection does not exist yet.
pub async fn ensure_index(state: &AppState) -> Result<Option<BuildReport>> {
    let _gate = state.rebuild_gate.lock().await;
    let _guard = state.rebuild_lock.write().await;
    if state
        .index
        .collection_exists(&state.config.index.collection)
        .await?
    {
        info!(
            "Collection {} already exists; skipping initial build",
            state.config.index.collection
        );
        return Ok(None);
    }
    info!(
        "Collection {} is missing; building it from {}",
        state.config.index.collection,
        state.config.data_root.display()
    );
    run_build(state).await.map(Some)
}

/// Caller must hold the rebuild gate and the write side of the rebuild lock.
pub(crate) async fn run_build(state: &AppState) -> Result<BuildReport> {
    let builder = state.index_builder()?;
    let report = builder.build_index(&state.config.data_root).await?;
    info!(
        "Index build finished: {} points from {} documents ({} skipped)",
        report.indexed, report.documents, report.skipped_documents
    );
    Ok(report)
}

/// Start the startup build in the background so the server can accept
/// requests meanwhile.
pub fn start_initial_build(state: Arc<AppState>) {
    tokio::spawn(async move {
        if let Err(e) = ensure_index(&state).await {
            error!("Initial index build failed: {}", e);
        }
    });
}
