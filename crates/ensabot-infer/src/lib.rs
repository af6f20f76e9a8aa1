//! ENSA Bot Infer — sentence embeddings, tokenization, query cache.
//!
//! Provides the `EmbedderBackend` and `TextTokenizer` traits.
//! When the `onnx` feature is enabled and model files are present,
//! `OnnxEmbedder` loads sentence-camembert-base for 768-dim embeddings.
//! Without it, `NoopEmbedder` is used and every embedding call fails.

pub mod cache;
pub mod embedder;
pub mod onnx_embedder;
pub mod tokenizer;

pub use cache::{CacheStats, QueryCache};
pub use embedder::{l2_normalize, EmbedderBackend, NoopEmbedder};
pub use tokenizer::TextTokenizer;

#[cfg(feature = "onnx")]
pub use onnx_embedder::OnnxEmbedder;
#[cfg(feature = "onnx")]
pub use tokenizer::HfTokenizer;

use std::path::Path;
use std::sync::Arc;

use ensabot_core::Result;

/// Create the best available embedder for the given model directory.
///
/// Tries ONNX first (if feature enabled and model files present),
/// falls back to NoopEmbedder.
pub fn create_embedder(model_dir: &Path, dimension: usize) -> Arc<dyn EmbedderBackend> {
    #[cfg(feature = "onnx")]
    {
        match OnnxEmbedder::load(model_dir, dimension) {
            Ok(embedder) => {
                tracing::info!("Using ONNX embedder (dim={})", embedder.dimension());
                return Arc::new(embedder);
            }
            Err(e) => {
                tracing::warn!("ONNX embedder unavailable: {}. Retrieval is disabled.", e);
            }
        }
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = model_dir;
        tracing::warn!("ONNX feature disabled. Retrieval is disabled.");
    }

    Arc::new(NoopEmbedder::new(dimension))
}

/// Load the tokenizer matching the embedding model.
pub fn create_tokenizer(model_dir: &Path) -> Result<Arc<dyn TextTokenizer>> {
    #[cfg(feature = "onnx")]
    {
        Ok(Arc::new(HfTokenizer::load(model_dir)?))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Err(ensabot_core::Error::Config(format!(
            "cannot load tokenizer from {}: built without the onnx feature",
            model_dir.display()
        )))
    }
}
