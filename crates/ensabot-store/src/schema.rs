//! Database schema for the local vector index.

/// Collections and their points. Point vectors are little-endian f32 blobs;
/// `seq` preserves insertion order for stable tie-breaking.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    distance TEXT NOT NULL,
    ef_construct INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS points (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    point_id TEXT NOT NULL,
    vector BLOB NOT NULL,
    payload_json TEXT NOT NULL,
    UNIQUE(collection, point_id)
);

CREATE INDEX IF NOT EXISTS idx_points_collection ON points(collection, seq);
"#;
