//! Token-window chunking.
//!
//! Documents are tokenized with the embedding model's tokenizer and cut into
//! sliding windows. A window holds at most `chunk_size` tokens once the
//! model's special tokens are added, and its decoded text must re-encode
//! within that budget. Consecutive windows start `chunk_size - overlap`
//! tokens apart unless a window had to be shortened; the last window is the
//! first one that reaches the end of the token stream.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::source::{Document, DocumentKind};
use ensabot_core::{ChunkingConfig, Error, Result};
use ensabot_infer::TextTokenizer;
use ensabot_store::ChunkMetadata;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A bounded span of one document, with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Collapse whitespace runs to one space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Number of windows produced for `n_tokens` tokens.
pub fn window_count(n_tokens: usize, config: &ChunkingConfig) -> usize {
    if n_tokens == 0 {
        0
    } else if n_tokens <= config.chunk_size {
        1
    } else {
        let stride = config.stride();
        (n_tokens - config.chunk_size).div_ceil(stride) + 1
    }
}

/// Splits documents into token-bounded chunks.
pub struct TokenChunker {
    tokenizer: Arc<dyn TextTokenizer>,
    config: ChunkingConfig,
    /// `config` with the tokenizer's special tokens taken off `chunk_size`.
    window: ChunkingConfig,
}

impl TokenChunker {
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let special = tokenizer.special_tokens();
        let budget = config.chunk_size.saturating_sub(special);
        let window = ChunkingConfig::new(budget, config.overlap).map_err(|_| {
            Error::Config(format!(
                "chunk size {} leaves no room past the overlap ({}) once {} special tokens are added",
                config.chunk_size, config.overlap, special
            ))
        })?;
        Ok(Self {
            tokenizer,
            config,
            window,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunks of one document, parts numbered from 1. Empty content yields
    /// no chunks.
    pub fn chunk_document(&self, doc: &Document) -> Result<Vec<Chunk>> {
        let text = match doc.kind {
            DocumentKind::Text => normalize_whitespace(&doc.content),
            DocumentKind::Schedule => doc.content.trim().to_string(),
        };
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.tokenizer.encode(&text)?;
        let file_name = doc.file_name();
        let source = doc.path.display().to_string();

        let n = tokens.len();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < n {
            let end = (start + self.window.chunk_size).min(n);
            let (text, end) = self.decode_fitting(&tokens, start, end)?;
            let part = chunks.len() as u32 + 1;
            let name = match doc.kind {
                DocumentKind::Schedule => file_name.clone(),
                DocumentKind::Text => format!("{} (part {})", file_name, part),
            };
            chunks.push(Chunk {
                text,
                metadata: ChunkMetadata {
                    name,
                    categorie: doc.category.clone(),
                    source: source.clone(),
                    part,
                    token_start: start,
                },
            });
            if end == n {
                break;
            }
            start = end.saturating_sub(self.window.overlap).max(start + 1);
        }

        debug!(
            "{}: {} tokens -> {} chunks",
            file_name,
            tokens.len(),
            chunks.len()
        );
        Ok(chunks)
    }

    /// Decode `tokens[start..end]`, dropping trailing tokens until the text
    /// re-encodes within the window. Returns the text and the end kept.
    fn decode_fitting(
        &self,
        tokens: &[u32],
        start: usize,
        mut end: usize,
    ) -> Result<(String, usize)> {
        loop {
            let text = self.tokenizer.decode(&tokens[start..end])?;
            if end - start <= 1
                || self.tokenizer.encode(&text)?.len() <= self.window.chunk_size
            {
                return Ok((text, end));
            }
            end -= 1;
        }
    }

    /// Chunks of every document, in document order.
    pub fn chunk_documents(&self, docs: &[Document]) -> Result<Vec<Chunk>> {
        let mut all = Vec::new();
        for doc in docs {
            all.extend(self.chunk_document(doc)?);
        }
        Ok(all)
    }
}
