//! Chunk deduplication.
//!
//! Two chunks are duplicates when their whitespace-stripped texts are equal.
//! The first occurrence wins and keeps its metadata; later copies are dropped
//! together with theirs. Blank chunks are always dropped. Surviving chunks
//! keep their relative order and their stripped text.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chunking::Chunk;
use ensabot_core::{Error, Result};
use ensabot_store::ChunkMetadata;

/// SHA-256 of `text`, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keep the first non-blank occurrence of each stripped text.
fn keep_first<T>(items: impl IntoIterator<Item = (String, T)>) -> Vec<(String, T)> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter_map(|(text, extra)| {
            let stripped = text.trim();
            if stripped.is_empty() || !seen.insert(content_hash(stripped)) {
                return None;
            }
            Some((stripped.to_string(), extra))
        })
        .collect()
}

/// Deduplicate parallel text and metadata lists.
pub fn dedup_parallel(
    texts: Vec<String>,
    metadata: Vec<ChunkMetadata>,
) -> Result<(Vec<String>, Vec<ChunkMetadata>)> {
    if texts.len() != metadata.len() {
        return Err(Error::Internal(format!(
            "chunk/metadata length mismatch: {} texts, {} metadata",
            texts.len(),
            metadata.len()
        )));
    }
    let before = texts.len();
    let kept: (Vec<String>, Vec<ChunkMetadata>) =
        keep_first(texts.into_iter().zip(metadata)).into_iter().unzip();
    debug!("Dedup: {} -> {} chunks", before, kept.0.len());
    Ok(kept)
}

/// Deduplicate chunks.
pub fn dedup_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let before = chunks.len();
    let kept: Vec<Chunk> = keep_first(chunks.into_iter().map(|c| (c.text, c.metadata)))
        .into_iter()
        .map(|(text, metadata)| Chunk { text, metadata })
        .collect();
    debug!("Dedup: {} -> {} chunks", before, kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str, part: u32) -> ChunkMetadata {
        ChunkMetadata {
            name: format!("{} (part {})", source, part),
            categorie: "txt".into(),
            source: source.into(),
            part,
            token_start: 0,
        }
    }

    #[test]
    fn test_first_occurrence_wins() {
        let texts = vec![
            "Inscriptions en septembre".to_string(),
            "Examens en janvier".to_string(),
            "  Inscriptions en septembre \n".to_string(),
        ];
        let metadata = vec![meta("a.txt", 1), meta("b.txt", 1), meta("c.txt", 1)];

        let (texts, metadata) = dedup_parallel(texts, metadata).unwrap();
        assert_eq!(texts, vec!["Inscriptions en septembre", "Examens en janvier"]);
        assert_eq!(metadata[0].source, "a.txt");
        assert_eq!(metadata[1].source, "b.txt");
    }

    #[test]
    fn test_blank_chunks_dropped() {
        let texts = vec!["   ".to_string(), "".to_string(), "contenu".to_string()];
        let metadata = vec![meta("a.txt", 1), meta("a.txt", 2), meta("a.txt", 3)];
        let (texts, metadata) = dedup_parallel(texts, metadata).unwrap();
        assert_eq!(texts, vec!["contenu"]);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].part, 3);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let err = dedup_parallel(vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let chunks: Vec<Chunk> = ["x", " y ", "x ", "z", "", "y"]
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                text: t.to_string(),
                metadata: meta("d.txt", i as u32 + 1),
            })
            .collect();

        let once = dedup_chunks(chunks);
        let twice = dedup_chunks(once.clone());
        assert_eq!(once, twice);
        let texts: Vec<_> = once.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
