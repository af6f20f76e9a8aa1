//! Retrieval result types.

use serde::Serialize;

use ensabot_core::{Error, Result, RetrievalMode};
use ensabot_store::SearchHit;

/// Separator placed between chunks in the generation context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 2000;

/// Ranked chunks for one query, ready for generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedContext {
    /// Chunk texts joined by `CONTEXT_SEPARATOR`, best first.
    pub context: String,
    /// Source path of every hit, in rank order. Repeats are kept.
    pub sources: Vec<String>,
    pub hits: Vec<SearchHit>,
    /// Strategy that actually produced the hits.
    pub mode: RetrievalMode,
}

impl RetrievedContext {
    pub fn from_hits(hits: Vec<SearchHit>, mode: RetrievalMode) -> Self {
        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let sources = hits.iter().map(|h| h.source().to_string()).collect();
        Self {
            context,
            sources,
            hits,
            mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Trimmed query, or a `Config` error when it is empty or too long.
pub fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Config("query must not be empty".into()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(Error::Config(format!(
            "query is {} characters long, the limit is {}",
            chars, MAX_QUERY_CHARS
        )));
    }
    Ok(query)
}
