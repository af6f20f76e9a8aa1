//! Data types for indexed points and search results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category label given to every JSON schedule chunk.
pub const SCHEDULE_CATEGORY: &str = "emploi du temps";

/// Provenance attached 1:1 to every chunk and stored in the point payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Display name: file name, or `"<file> (part <n>)"` for text documents.
    pub name: String,
    pub categorie: String,
    /// Absolute path of the source document.
    pub source: String,
    /// 1-based position of the chunk within its document.
    pub part: u32,
    /// Offset of the chunk's first token in the document token stream.
    #[serde(default)]
    pub token_start: usize,
}

/// Point payload: the chunk text plus every metadata field, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub chunk: String,
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

/// One record of a collection.
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl IndexedPoint {
    pub fn new(vector: Vec<f32>, chunk: String, metadata: ChunkMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            payload: PointPayload { chunk, metadata },
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

impl SearchHit {
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

impl From<(PointPayload, f32)> for SearchHit {
    fn from((payload, score): (PointPayload, f32)) -> Self {
        Self {
            text: payload.chunk,
            score,
            metadata: payload.metadata,
        }
    }
}

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Dot,
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Dot => "Dot",
            Distance::Cosine => "Cosine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Dot" => Some(Distance::Dot),
            "Cosine" => Some(Distance::Cosine),
            _ => None,
        }
    }
}

/// Parameters for creating a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
    pub ef_construct: usize,
}

impl CollectionSpec {
    /// Dot-product collection over normalized vectors.
    pub fn dot(name: impl Into<String>, dimension: usize, ef_construct: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance: Distance::Dot,
            ef_construct,
        }
    }
}

/// Exact-match conditions on payload fields. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<u32>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.categorie.is_none() && self.source.is_none() && self.part.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.name.as_ref().map_or(true, |n| n == &metadata.name)
            && self.categorie.as_ref().map_or(true, |c| c == &metadata.categorie)
            && self.source.as_ref().map_or(true, |s| s == &metadata.source)
            && self.part.map_or(true, |p| p == metadata.part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ChunkMetadata {
        ChunkMetadata {
            name: "gi2.json".into(),
            categorie: SCHEDULE_CATEGORY.into(),
            source: "/data/emploi-temps/gi2.json".into(),
            part: 1,
            token_start: 0,
        }
    }

    #[test]
    fn test_payload_is_flat() {
        let payload = PointPayload {
            chunk: "Lundi | Matière: Algo".into(),
            metadata: metadata(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["chunk"], "Lundi | Matière: Algo");
        assert_eq!(json["categorie"], "emploi du temps");
        assert_eq!(json["part"], 1);
        assert_eq!(json["token_start"], 0);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_payload_without_token_start_parses() {
        let json = serde_json::json!({
            "chunk": "texte",
            "name": "a.txt (part 1)",
            "categorie": "scolarite",
            "source": "/data/scolarite/a.txt",
            "part": 1,
        });
        let payload: PointPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.metadata.token_start, 0);
    }

    #[test]
    fn test_filter_matching() {
        let m = metadata();
        assert!(MetadataFilter::default().matches(&m));
        assert!(MetadataFilter::default().is_empty());

        let by_category = MetadataFilter {
            categorie: Some(SCHEDULE_CATEGORY.into()),
            ..Default::default()
        };
        assert!(by_category.matches(&m));

        let wrong_part = MetadataFilter {
            categorie: Some(SCHEDULE_CATEGORY.into()),
            part: Some(2),
            ..Default::default()
        };
        assert!(!wrong_part.matches(&m));
    }
}
