//! ENSA Bot Core — error taxonomy and pipeline configuration.

pub mod config;
pub mod error;

pub use config::{
    ChunkingConfig, EnsaBotConfig, GenerationConfig, IndexBackendKind, IndexTarget,
    RetrievalConfig, RetrievalMode,
};
pub use error::{Error, Result};
