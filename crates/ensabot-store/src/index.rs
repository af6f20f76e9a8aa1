//! The vector index abstraction shared by the builder and the retriever.

use async_trait::async_trait;
use ensabot_core::Result;

use crate::types::{CollectionSpec, IndexedPoint, MetadataFilter, SearchHit};

/// A store of named collections of fixed-dimension vectors with payloads.
///
/// Backends report connection or storage failures as
/// `Error::IndexUnavailable`. Searching a collection that does not exist is
/// also `IndexUnavailable`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend label, e.g. `"qdrant"`.
    fn backend_name(&self) -> &'static str;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create an empty collection. Fails if it already exists.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Drop a collection and all its points. Returns false if it was absent.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Insert or replace points by id. Returns the number written.
    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize>;

    /// The `top_k` most similar points, best first. Only points whose
    /// payload satisfies `filter` are considered.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self, collection: &str) -> Result<usize>;
}
