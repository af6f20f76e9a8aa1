//! Embedding engine trait and implementations.
//!
//! The `EmbedderBackend` trait abstracts over embedding generation.
//! Implementations:
//! - `OnnxEmbedder`: ONNX Runtime with sentence-camembert-base (requires the `onnx` feature)
//! - `NoopEmbedder`: no model loaded; every call fails with `Error::Embedding`

use ensabot_core::{Error, Result};
use ndarray::Array1;

/// Trait for embedding backends.
pub trait EmbedderBackend: Send + Sync {
    /// Generate a raw (unnormalized) embedding for a text string.
    fn embed(&self, text: &str) -> Result<Array1<f32>>;

    /// Generate raw embeddings for a batch of texts.
    ///
    /// Each text is embedded on its own, so the output for a text never
    /// depends on which batch it was sent in.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Embedding for `text`, scaled to unit length.
    fn embed_normalized(&self, text: &str) -> Result<Array1<f32>> {
        self.embed(text).map(l2_normalize)
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Check if the embedder is available (model loaded).
    fn is_available(&self) -> bool;
}

/// Divide a vector by its L2 norm. A zero vector is returned unchanged.
pub fn l2_normalize(vector: Array1<f32>) -> Array1<f32> {
    let norm = vector.dot(&vector).sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector / norm
}

/// Placeholder embedder used when no model could be loaded.
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbedderBackend for NoopEmbedder {
    fn embed(&self, _text: &str) -> Result<Array1<f32>> {
        Err(Error::Embedding("no embedding model loaded".into()))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn is_available(&self) -> bool {
        false
    }
}
