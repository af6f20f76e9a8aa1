//! ONNX-based embedding engine for sentence-camembert-base.
//!
//! Loads a SentenceTransformers ONNX export and its tokenizer to generate
//! 768-dimensional float32 embeddings. Requires the `onnx` feature.

#[cfg(feature = "onnx")]
mod inner {
    use std::path::Path;
    use std::sync::Arc;

    use ensabot_core::{Error, Result};
    use ndarray::Array1;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tracing::info;

    use crate::embedder::EmbedderBackend;
    use crate::tokenizer::HfTokenizer;

    /// Maximum sequence length for CamemBERT (514 positions, 2 reserved).
    /// Chunks already fit once special tokens are added; this only bounds
    /// oversized queries.
    const MAX_SEQ_LEN: usize = 512;

    /// ONNX embedding engine.
    pub struct OnnxEmbedder {
        session: Arc<Mutex<Session>>,
        tokenizer: HfTokenizer,
        dimension: usize,
    }

    impl OnnxEmbedder {
        /// Load an ONNX model and tokenizer from the given directory.
        ///
        /// Expects:
        /// - `model_dir/model.onnx` — the ONNX model file
        /// - `model_dir/tokenizer.json` — the HuggingFace tokenizer
        pub fn load(model_dir: &Path, dimension: usize) -> Result<Self> {
            let model_path = model_dir.join("model.onnx");
            if !model_path.exists() {
                return Err(Error::Config(format!(
                    "Model not found: {}",
                    model_path.display()
                )));
            }
            let tokenizer = HfTokenizer::load(model_dir)?;

            // With load-dynamic, ORT_DYLIB_PATH must point to libonnxruntime.so
            ort::init().commit();

            let session = Session::builder()
                .map_err(|e| Error::Config(format!("Failed to create session builder: {}", e)))?
                .with_intra_threads(2)
                .map_err(|e| Error::Config(format!("Failed to set threads: {}", e)))?
                .commit_from_file(&model_path)
                .map_err(|e| Error::Config(format!("Failed to load ONNX model: {}", e)))?;

            info!(
                "ONNX embedder loaded: dim={}, model={}",
                dimension,
                model_path.display()
            );

            Ok(Self {
                session: Arc::new(Mutex::new(session)),
                tokenizer,
                dimension,
            })
        }

        /// Run inference on one text and mean-pool the token embeddings.
        fn infer(&self, text: &str) -> Result<Array1<f32>> {
            let encoding = self
                .tokenizer
                .inner()
                .encode(text, true)
                .map_err(|e| Error::Embedding(format!("Tokenization failed: {}", e)))?;

            let seq_len = encoding.get_ids().len().min(MAX_SEQ_LEN);
            let input_ids = &encoding.get_ids()[..seq_len];
            let attention_mask = &encoding.get_attention_mask()[..seq_len];

            let ids_data: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
            let mask_data: Vec<i64> = attention_mask.iter().map(|&m| m as i64).collect();

            let ids_tensor = Tensor::from_array(([1usize, seq_len], ids_data))
                .map_err(|e| Error::Embedding(format!("Failed to create ids tensor: {}", e)))?;
            let mask_tensor = Tensor::from_array(([1usize, seq_len], mask_data))
                .map_err(|e| Error::Embedding(format!("Failed to create mask tensor: {}", e)))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor])
                .map_err(|e| Error::Embedding(format!("ONNX inference failed: {}", e)))?;

            // Either [1, seq_len, dim] token embeddings or [1, dim] pooled output
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Embedding(format!("Failed to extract output: {}", e)))?;
            let dims: Vec<i64> = shape.iter().copied().collect();

            match dims.len() {
                3 => {
                    let dim = dims[2] as usize;
                    let mask_sum: f32 = attention_mask.iter().map(|&m| m as f32).sum();
                    if mask_sum < 1e-9 {
                        return Err(Error::Embedding("empty attention mask".into()));
                    }
                    let mut pooled = Array1::<f32>::zeros(dim);
                    for (i, &m) in attention_mask.iter().enumerate() {
                        if m > 0 {
                            let row = &data[i * dim..(i + 1) * dim];
                            for (d, value) in row.iter().enumerate() {
                                pooled[d] += value;
                            }
                        }
                    }
                    Ok(pooled / mask_sum)
                }
                2 => {
                    let dim = dims[1] as usize;
                    Ok(Array1::from_vec(data[..dim].to_vec()))
                }
                _ => Err(Error::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    dims
                ))),
            }
        }
    }

    impl EmbedderBackend for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            self.infer(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Array1<f32>>> {
            // One inference per text: no padding, so results match single calls
            texts.iter().map(|t| self.infer(t)).collect()
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn is_available(&self) -> bool {
            true
        }
    }
}

#[cfg(feature = "onnx")]
pub use inner::OnnxEmbedder;
