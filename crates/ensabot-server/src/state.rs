//! Shared application state.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use ensabot_chat::FailoverGenerator;
use ensabot_core::{EnsaBotConfig, Error, Result};
use ensabot_infer::{EmbedderBackend, QueryCache, TextTokenizer};
use ensabot_ingest::IndexBuilder;
use ensabot_resolve::Retriever;
use ensabot_store::VectorIndex;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: EnsaBotConfig,
    pub embedder: Arc<dyn EmbedderBackend>,
    /// None when the model's tokenizer could not be loaded; rebuilds fail.
    pub tokenizer: Option<Arc<dyn TextTokenizer>>,
    pub index: Arc<dyn VectorIndex>,
    pub retriever: Retriever,
    pub generator: Arc<FailoverGenerator>,
    /// Queries hold the read side, a rebuild holds the write side.
    pub rebuild_lock: RwLock<()>,
    /// Held for the whole rebuild; a second rebuild is refused while taken.
    pub rebuild_gate: Mutex<()>,
}

impl AppState {
    pub fn new(
        config: EnsaBotConfig,
        embedder: Arc<dyn EmbedderBackend>,
        tokenizer: Option<Arc<dyn TextTokenizer>>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<FailoverGenerator>,
    ) -> Self {
        let retriever = Retriever::new(
            embedder.clone(),
            index.clone(),
            config.index.collection.clone(),
        )
        .with_reasoner(generator.clone())
        .with_cache(Arc::new(QueryCache::default_cache()));

        Self {
            config,
            embedder,
            tokenizer,
            index,
            retriever,
            generator,
            rebuild_lock: RwLock::new(()),
            rebuild_gate: Mutex::new(()),
        }
    }

    /// Open the index, load the model and set up generation from `config`.
    pub fn from_config(config: EnsaBotConfig) -> Result<Self> {
        let index = ensabot_store::open_index(&config.index)?;
        info!(
            "Vector index: {} (collection {})",
            index.backend_name(),
            config.index.collection
        );

        info!(
            "Embedding model {} from {}",
            config.embedding_model,
            config.model_dir.display()
        );
        let embedder = ensabot_infer::create_embedder(&config.model_dir, config.embedding_dim);
        let tokenizer = match ensabot_infer::create_tokenizer(&config.model_dir) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Tokenizer unavailable, index builds are disabled: {}", e);
                None
            }
        };

        let generator = Arc::new(FailoverGenerator::from_config(&config.generation));
        if generator.credential_count() == 0 {
            warn!("No LLM API keys configured; answers will fail");
        } else {
            info!("{} LLM API key(s) configured", generator.credential_count());
        }

        Ok(Self::new(config, embedder, tokenizer, index, generator))
    }

    pub fn index_builder(&self) -> Result<IndexBuilder> {
        let tokenizer = self
            .tokenizer
            .clone()
            .ok_or_else(|| Error::Embedding("tokenizer not loaded".into()))?;
        Ok(IndexBuilder::from_config(
            &self.config,
            self.embedder.clone(),
            tokenizer,
            self.index.clone(),
        ))
    }
}
