//! Text tokenization used to measure and window chunks.
//!
//! Chunk budgets are counted in the embedding model's own tokens, so the
//! chunker and the embedder must share one tokenizer. `HfTokenizer` loads the
//! model's `tokenizer.json` (requires the `onnx` feature).

use ensabot_core::Result;

/// Token encoder/decoder shared by the chunker.
pub trait TextTokenizer: Send + Sync {
    /// Token ids for `text`, without special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Text for a span of token ids.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Ids the model wraps around one encoded sequence (`<s>`, `</s>`).
    fn special_tokens(&self) -> usize {
        0
    }
}

#[cfg(feature = "onnx")]
mod hf {
    use std::path::Path;

    use ensabot_core::{Error, Result};
    use tokenizers::{PostProcessor, Tokenizer};
    use tracing::info;

    use super::TextTokenizer;

    /// HuggingFace tokenizer loaded from `tokenizer.json`.
    pub struct HfTokenizer {
        inner: Tokenizer,
    }

    impl HfTokenizer {
        pub fn load(model_dir: &Path) -> Result<Self> {
            let path = model_dir.join("tokenizer.json");
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Tokenizer not found: {}",
                    path.display()
                )));
            }
            let inner = Tokenizer::from_file(&path)
                .map_err(|e| Error::Config(format!("Failed to load tokenizer: {}", e)))?;
            info!("Tokenizer loaded from {}", path.display());
            Ok(Self { inner })
        }

        pub(crate) fn inner(&self) -> &Tokenizer {
            &self.inner
        }
    }

    impl TextTokenizer for HfTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            let encoding = self
                .inner
                .encode(text, false)
                .map_err(|e| Error::Embedding(format!("Tokenization failed: {}", e)))?;
            Ok(encoding.get_ids().to_vec())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            self.inner
                .decode(ids, true)
                .map_err(|e| Error::Embedding(format!("Detokenization failed: {}", e)))
        }

        fn special_tokens(&self) -> usize {
            self.inner
                .get_post_processor()
                .map(|p| p.added_tokens(false))
                .unwrap_or(0)
        }
    }
}

#[cfg(feature = "onnx")]
pub use hf::HfTokenizer;
