//! ENSA Bot Ingest — source loading, token-window chunking, deduplication
//! and index builds.

pub mod build;
pub mod chunking;
pub mod dedup;
pub mod source;

pub use build::{embed_all, prepare_corpus, BuildReport, IndexBuilder, PreparedCorpus};
pub use chunking::{normalize_whitespace, window_count, Chunk, TokenChunker};
pub use dedup::{content_hash, dedup_chunks, dedup_parallel};
pub use source::{load_sources, Document, DocumentKind, LoadedSources};
