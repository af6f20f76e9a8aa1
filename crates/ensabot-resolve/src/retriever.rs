//! Query-time retrieval: embed, search, assemble context.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::reasoner::{
    multi_query_prompt, parse_alternatives, parse_self_query, self_query_prompt, QueryReasoner,
};
use crate::types::RetrievedContext;
use ensabot_core::{Error, Result, RetrievalMode};
use ensabot_infer::{EmbedderBackend, QueryCache};
use ensabot_store::{MetadataFilter, SearchHit, VectorIndex};

/// Top-k semantic search over one collection.
pub struct Retriever {
    embedder: Arc<dyn EmbedderBackend>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    reasoner: Option<Arc<dyn QueryReasoner>>,
    cache: Option<Arc<QueryCache>>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbedderBackend>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            reasoner: None,
            cache: None,
        }
    }

    /// Enable the LLM-assisted modes.
    pub fn with_reasoner(mut self, reasoner: Arc<dyn QueryReasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Reuse query embeddings across requests.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<QueryCache>> {
        self.cache.as_ref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Plain top-k vector search.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<RetrievedContext> {
        let hits = self.search_hits(query, top_k, None).await?;
        Ok(RetrievedContext::from_hits(hits, RetrievalMode::Default))
    }

    /// Search using `mode`. The LLM-assisted modes fall back to plain search
    /// when no reasoner is configured or its answer is unusable.
    pub async fn search_with(
        &self,
        query: &str,
        top_k: usize,
        mode: RetrievalMode,
    ) -> Result<RetrievedContext> {
        let reasoner = match (mode, &self.reasoner) {
            (RetrievalMode::Default, _) => return self.search(query, top_k).await,
            (_, None) => {
                debug!("No reasoner configured; using plain search");
                return self.search(query, top_k).await;
            }
            (_, Some(r)) => r.clone(),
        };

        match mode {
            RetrievalMode::SelfQuery => self.self_query(reasoner.as_ref(), query, top_k).await,
            RetrievalMode::MultiQuery => self.multi_query(reasoner.as_ref(), query, top_k).await,
            RetrievalMode::Default => self.search(query, top_k).await,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(query)) {
            debug!("Query embedding cache hit");
            return Ok(hit.to_vec());
        }
        let embedder = self.embedder.clone();
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_normalized(&text))
            .await
            .map_err(|e| Error::Internal(format!("embedding task failed: {}", e)))??;
        if let Some(cache) = &self.cache {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector.to_vec())
    }

    async fn search_hits(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embed_query(query).await?;
        let hits = self
            .index
            .search(&self.collection, &vector, top_k, filter)
            .await?;
        debug!("Query matched {} chunks", hits.len());
        Ok(hits)
    }

    async fn self_query(
        &self,
        reasoner: &dyn QueryReasoner,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext> {
        let parsed = match reasoner.complete(&self_query_prompt(query)).await {
            Ok(response) => parse_self_query(&response),
            Err(e) => {
                warn!("Self-query rewrite failed: {}", e);
                None
            }
        };
        let Some(parsed) = parsed else {
            warn!("Self-query produced no usable filter; using plain search");
            return self.search(query, top_k).await;
        };

        let rewritten = parsed.query.as_deref().unwrap_or(query);
        let filter = (!parsed.filter.is_empty()).then_some(&parsed.filter);
        info!(
            "Self-query: query={:?} filter={:?}",
            rewritten, filter
        );
        let hits = self.search_hits(rewritten, top_k, filter).await?;
        if hits.is_empty() && filter.is_some() {
            debug!("Filtered search found nothing; using plain search");
            return self.search(query, top_k).await;
        }
        Ok(RetrievedContext::from_hits(hits, RetrievalMode::SelfQuery))
    }

    async fn multi_query(
        &self,
        reasoner: &dyn QueryReasoner,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext> {
        let alternatives = match reasoner.complete(&multi_query_prompt(query)).await {
            Ok(response) => parse_alternatives(&response, query),
            Err(e) => {
                warn!("Multi-query expansion failed: {}", e);
                return self.search(query, top_k).await;
            }
        };
        info!("Multi-query: {} alternative phrasings", alternatives.len());

        let mut merged: Vec<SearchHit> = Vec::new();
        for q in std::iter::once(query).chain(alternatives.iter().map(String::as_str)) {
            for hit in self.search_hits(q, top_k, None).await? {
                if !merged.iter().any(|m| m.text == hit.text) {
                    merged.push(hit);
                }
            }
        }
        Ok(RetrievedContext::from_hits(merged, RetrievalMode::MultiQuery))
    }
}
