//! Pipeline configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_EMBEDDING_MODEL: &str = "dangvantuan/sentence-camembert-base";
pub const DEFAULT_COLLECTION: &str = "ENSA_chatbot";
pub const DEFAULT_LLM_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";

/// Legacy per-key variables, tried in this order after `GROQ_API_KEYS`.
const LEGACY_KEY_VARS: &[&str] = &[
    "groq_api1",
    "groq_api_2",
    "groq_api_3",
    "groq_api_4",
    "groq_api_5",
    "groq_api_6",
    "groq_api_7",
    "groq_api_8",
];

/// Token-window chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens shared between consecutive windows.
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance in tokens between the starts of two consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
        }
    }
}

/// Which vector index implementation backs the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
    Qdrant,
    Sqlite,
}

impl FromStr for IndexBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "sqlite" | "local" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!("unknown index backend: {}", other))),
        }
    }
}

/// Where the vector index lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTarget {
    pub backend: IndexBackendKind,
    /// Base URL of the Qdrant REST API (local `http://host:port` or cloud URL).
    pub url: String,
    /// Cloud API key, sent as the `api-key` header.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Directory of the local SQLite index.
    pub local_dir: PathBuf,
    pub collection: String,
    /// HNSW `ef_construct` used when the collection is created.
    pub ef_construct: usize,
}

/// Retrieval strategy selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Plain top-k vector search.
    #[default]
    Default,
    /// LLM derives metadata filters before the vector search.
    #[serde(rename = "self")]
    SelfQuery,
    /// LLM expands the query into paraphrases, each searched independently.
    #[serde(rename = "multi")]
    MultiQuery,
}

impl FromStr for RetrievalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" | "" => Ok(Self::Default),
            "self" | "self_query" => Ok(Self::SelfQuery),
            "multi" | "multi_query" => Ok(Self::MultiQuery),
            other => Err(Error::Config(format!("unknown retrieval mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub mode: RetrievalMode,
}

/// Remote LLM parameters and the ordered credential list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: usize,
    /// Idle timeout applied to every read from the remote stream.
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub credentials: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LLM_URL.into(),
            model: DEFAULT_LLM_MODEL.into(),
            temperature: 0.6,
            max_tokens: 1500,
            timeout_secs: 60,
            credentials: Vec::new(),
        }
    }
}

/// Top-level ENSA Bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsaBotConfig {
    /// HTTP server port.
    pub port: u16,
    /// Root of the source documents (`emploi-temps/*.json`, `**/*.txt`).
    pub data_root: PathBuf,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Pretrained sentence-embedding model identifier.
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub index: IndexTarget,
    pub chunking: ChunkingConfig,
    /// Chunks embedded and upserted per batch.
    pub batch_size: usize,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

impl EnsaBotConfig {
    /// Create configuration from the process environment and defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PORT", 3003u16)?;
        let data_root = get("ENSABOT_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/data_final"));
        let model_dir = get("ENSABOT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("models/sentence-camembert-base"));
        let embedding_model =
            get("ENSABOT_EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.into());
        let embedding_dim = parse_or(&get, "ENSABOT_EMBEDDING_DIM", 768usize)?;

        let use_cloud = get("QDRANT_USE_CLOUD")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let (url, api_key) = if use_cloud {
            let url = get("QDRANT_URL").ok_or_else(|| {
                Error::Config("QDRANT_URL is required when QDRANT_USE_CLOUD=true".into())
            })?;
            (url, get("QDRANT_API_KEY"))
        } else {
            let host = get("QDRANT_HOST").unwrap_or_else(|| "localhost".into());
            let qdrant_port = parse_or(&get, "QDRANT_PORT", 6333u16)?;
            (format!("http://{}:{}", host, qdrant_port), None)
        };
        let backend = match get("ENSABOT_INDEX_BACKEND") {
            Some(v) => v.parse()?,
            None => IndexBackendKind::Qdrant,
        };
        let index = IndexTarget {
            backend,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            local_dir: get("ENSABOT_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/vectordb")),
            collection: get("ENSABOT_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            ef_construct: parse_or(&get, "ENSABOT_EF_CONSTRUCT", 300usize)?,
        };

        let chunking = ChunkingConfig::new(
            parse_or(&get, "ENSABOT_CHUNK_SIZE", 512usize)?,
            parse_or(&get, "ENSABOT_CHUNK_OVERLAP", 50usize)?,
        )?;
        let batch_size = parse_or(&get, "ENSABOT_BATCH_SIZE", 64usize)?;
        if batch_size == 0 {
            return Err(Error::Config("batch size must be greater than zero".into()));
        }

        let retrieval = RetrievalConfig {
            top_k: parse_or(&get, "ENSABOT_TOP_K", 3usize)?,
            mode: match get("ENSABOT_RETRIEVAL_MODE") {
                Some(v) => v.parse()?,
                None => RetrievalMode::MultiQuery,
            },
        };

        let defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            url: get("ENSABOT_LLM_URL").unwrap_or(defaults.url),
            model: get("ENSABOT_LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_or(&get, "ENSABOT_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_or(&get, "ENSABOT_MAX_TOKENS", defaults.max_tokens)?,
            timeout_secs: parse_or(&get, "ENSABOT_LLM_TIMEOUT_SECS", defaults.timeout_secs)?,
            credentials: collect_credentials(&get),
        };

        Ok(Self {
            port,
            data_root,
            model_dir,
            embedding_model,
            embedding_dim,
            index,
            chunking,
            batch_size,
            retrieval,
            generation,
        })
    }
}

/// Ordered credential list: `GROQ_API_KEYS` entries first, then legacy variables.
fn collect_credentials<F>(get: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut keys: Vec<String> = get("GROQ_API_KEYS")
        .map(|v| {
            v.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for var in LEGACY_KEY_VARS {
        if let Some(key) = get(var) {
            let key = key.trim().to_string();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {}: {:?}", key, raw))),
        None => Ok(default),
    }
}
