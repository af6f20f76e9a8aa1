//! Index builds: documents → chunks → dedup → embeddings → fresh collection.
//!
//! A build replaces the collection wholesale. Everything that can fail before
//! the old collection is dropped (loading, chunking, embedding) runs first, so
//! an empty corpus or a broken model leaves the live index untouched. If the
//! bulk load fails halfway, the partial collection is removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunking::{Chunk, TokenChunker};
use crate::dedup::dedup_chunks;
use crate::source::load_sources;
use ensabot_core::{ChunkingConfig, EnsaBotConfig, Error, Result};
use ensabot_infer::{l2_normalize, EmbedderBackend, TextTokenizer};
use ensabot_store::{CollectionSpec, IndexedPoint, VectorIndex};

pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_EF_CONSTRUCT: usize = 300;

/// Outcome of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Points written to the new collection.
    pub indexed: usize,
    /// Documents that were read successfully.
    pub documents: usize,
    pub skipped_documents: usize,
    pub chunks_before_dedup: usize,
}

/// Deduplicated chunks of a corpus, ready to embed.
#[derive(Debug, Default)]
pub struct PreparedCorpus {
    pub chunks: Vec<Chunk>,
    pub documents: usize,
    pub skipped_documents: usize,
    pub chunks_before_dedup: usize,
}

/// Load, chunk and deduplicate everything under `root`.
pub fn prepare_corpus(chunker: &TokenChunker, root: &Path) -> Result<PreparedCorpus> {
    let loaded = load_sources(root);
    let chunks = chunker.chunk_documents(&loaded.documents)?;
    let chunks_before_dedup = chunks.len();
    let chunks = dedup_chunks(chunks);
    info!(
        "Prepared {} chunks ({} before dedup) from {} documents",
        chunks.len(),
        chunks_before_dedup,
        loaded.documents.len()
    );
    Ok(PreparedCorpus {
        chunks,
        documents: loaded.documents.len(),
        skipped_documents: loaded.skipped.len(),
        chunks_before_dedup,
    })
}

/// Embed `texts` in batches and L2-normalize every vector.
///
/// Each text is embedded on its own, so batch boundaries never change the
/// result.
pub fn embed_all(
    embedder: &dyn EmbedderBackend,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dim = embedder.dimension();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        for embedding in embedder.embed_batch(batch)? {
            if embedding.len() != dim {
                return Err(Error::Embedding(format!(
                    "model returned dimension {}, expected {}",
                    embedding.len(),
                    dim
                )));
            }
            vectors.push(l2_normalize(embedding).to_vec());
        }
    }
    if vectors.len() != texts.len() {
        return Err(Error::Embedding(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Builds (and rebuilds) one collection from a corpus root.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbedderBackend>,
    tokenizer: Arc<dyn TextTokenizer>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    chunking: ChunkingConfig,
    batch_size: usize,
    ef_construct: usize,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn EmbedderBackend>,
        tokenizer: Arc<dyn TextTokenizer>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            tokenizer,
            index,
            collection: collection.into(),
            chunking: ChunkingConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            ef_construct: DEFAULT_EF_CONSTRUCT,
        }
    }

    pub fn from_config(
        config: &EnsaBotConfig,
        embedder: Arc<dyn EmbedderBackend>,
        tokenizer: Arc<dyn TextTokenizer>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self::new(embedder, tokenizer, index, config.index.collection.clone())
            .with_chunking(config.chunking)
            .with_batch_size(config.batch_size)
            .with_ef_construct(config.index.ef_construct)
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_ef_construct(mut self, ef_construct: usize) -> Self {
        self.ef_construct = ef_construct;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Rebuild the collection from every document under `root`.
    pub async fn build_index(&self, root: &Path) -> Result<BuildReport> {
        let chunker = TokenChunker::new(self.tokenizer.clone(), self.chunking)?;
        let root: PathBuf = root.to_path_buf();
        let corpus = tokio::task::spawn_blocking(move || prepare_corpus(&chunker, &root))
            .await
            .map_err(|e| Error::Internal(format!("chunking task failed: {}", e)))??;

        let indexed = self.index_chunks(corpus.chunks).await?;
        Ok(BuildReport {
            indexed,
            documents: corpus.documents,
            skipped_documents: corpus.skipped_documents,
            chunks_before_dedup: corpus.chunks_before_dedup,
        })
    }

    /// Replace the collection with exactly `chunks`. Returns the number of
    /// points written. An empty input leaves the index untouched.
    pub async fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            warn!(
                "No chunks to index; keeping collection {} as it is",
                self.collection
            );
            return Ok(0);
        }

        let embedder = self.embedder.clone();
        let batch_size = self.batch_size;
        let (chunks, vectors) = tokio::task::spawn_blocking(move || {
            let vectors = {
                let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
                embed_all(embedder.as_ref(), &texts, batch_size)
            };
            (chunks, vectors)
        })
        .await
        .map_err(|e| Error::Internal(format!("embedding task failed: {}", e)))?;
        let vectors = vectors?;
        info!("Embedded {} chunks", vectors.len());

        let points: Vec<IndexedPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedPoint::new(vector, chunk.text, chunk.metadata))
            .collect();

        if self.index.delete_collection(&self.collection).await? {
            info!("Dropped previous collection {}", self.collection);
        }
        let spec = CollectionSpec::dot(
            self.collection.clone(),
            self.embedder.dimension(),
            self.ef_construct,
        );
        self.index.create_collection(&spec).await?;

        let total = points.len();
        let mut written = 0;
        let mut remaining = points;
        while !remaining.is_empty() {
            let rest = remaining.split_off(self.batch_size.min(remaining.len()));
            let batch = std::mem::replace(&mut remaining, rest);
            match self.index.upsert(&self.collection, batch).await {
                Ok(n) => written += n,
                Err(e) => {
                    error!(
                        "Upsert failed after {} of {} points; removing partial collection {}",
                        written, total, self.collection
                    );
                    if let Err(cleanup) = self.index.delete_collection(&self.collection).await {
                        warn!("Could not remove partial collection: {}", cleanup);
                    }
                    return Err(e);
                }
            }
        }

        info!("Indexed {} points into {}", written, self.collection);
        Ok(written)
    }
}
