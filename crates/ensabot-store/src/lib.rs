//! ENSA Bot Store — vector index trait with SQLite and Qdrant backends.

pub mod index;
pub mod qdrant;
pub mod schema;
pub mod sqlite;
pub mod types;

use std::sync::Arc;

use ensabot_core::{IndexBackendKind, IndexTarget, Result};

pub use index::VectorIndex;
pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;
pub use types::*;

/// Open the index backend described by `target`.
pub fn open_index(target: &IndexTarget) -> Result<Arc<dyn VectorIndex>> {
    match target.backend {
        IndexBackendKind::Qdrant => Ok(Arc::new(QdrantIndex::new(
            &target.url,
            target.api_key.as_deref(),
        )?)),
        IndexBackendKind::Sqlite => Ok(Arc::new(SqliteIndex::open(&target.local_dir)?)),
    }
}
