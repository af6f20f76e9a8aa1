//! SQLite-backed vector index with exact dot-product search.
//!
//! Points live in one table; vectors are stored as f32 blobs. Each searched
//! collection is loaded once into an `(N, dim)` matrix and scored with a
//! single matrix-vector product. Any write invalidates the loaded matrix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::index::VectorIndex;
use crate::schema::SCHEMA_SQL;
use crate::types::*;
use ensabot_core::{Error, Result};

/// Local vector index in `<dir>/ensabot.db`.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    loaded: Mutex<HashMap<String, LoadedCollection>>,
}

struct LoadedCollection {
    distance: Distance,
    /// One row per point, in insertion order. Rows are unit length for cosine.
    matrix: Array2<f32>,
    payloads: Vec<PointPayload>,
}

struct CollectionRow {
    dimension: usize,
    distance: Distance,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::IndexUnavailable(format!("sqlite: {}", e))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl SqliteIndex {
    /// Open or create the index under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("ensabot.db");

        let conn = Connection::open(&db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::IndexUnavailable(format!("schema init failed: {}", e)))?;

        info!("SqliteIndex opened at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn collection_row(&self, name: &str) -> Result<Option<CollectionRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT dimension, distance FROM collections WHERE name = ?1",
                params![name],
                |row| {
                    let dimension: i64 = row.get(0)?;
                    let distance: String = row.get(1)?;
                    Ok((dimension as usize, distance))
                },
            )
            .optional()
            .map_err(db_err)?;

        match row {
            None => Ok(None),
            Some((dimension, distance)) => {
                let distance = Distance::parse(&distance).ok_or_else(|| {
                    Error::Internal(format!("unknown distance '{}' for {}", distance, name))
                })?;
                Ok(Some(CollectionRow {
                    dimension,
                    distance,
                }))
            }
        }
    }

    fn require_collection(&self, name: &str) -> Result<CollectionRow> {
        self.collection_row(name)?
            .ok_or_else(|| Error::IndexUnavailable(format!("collection '{}' does not exist", name)))
    }

    fn load_collection(&self, name: &str, row: &CollectionRow) -> Result<LoadedCollection> {
        let mut vectors = Vec::new();
        let mut payloads = Vec::new();
        {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT vector, payload_json FROM points WHERE collection = ?1 ORDER BY seq")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![name], |r| {
                    let blob: Vec<u8> = r.get(0)?;
                    let payload: String = r.get(1)?;
                    Ok((blob, payload))
                })
                .map_err(db_err)?;
            for entry in rows {
                let (blob, payload) = entry.map_err(db_err)?;
                vectors.push(decode_vector(&blob));
                payloads.push(serde_json::from_str::<PointPayload>(&payload)?);
            }
        }

        let mut matrix = Array2::zeros((vectors.len(), row.dimension));
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != row.dimension {
                return Err(Error::Internal(format!(
                    "stored vector has dimension {}, collection expects {}",
                    v.len(),
                    row.dimension
                )));
            }
            matrix.row_mut(i).assign(&Array1::from_vec(v.clone()));
        }
        if row.distance == Distance::Cosine {
            for mut r in matrix.rows_mut() {
                let norm = r.dot(&r).sqrt();
                if norm > 1e-9 {
                    r /= norm;
                }
            }
        }

        debug!("Loaded {} points for collection {}", payloads.len(), name);
        Ok(LoadedCollection {
            distance: row.distance,
            matrix,
            payloads,
        })
    }

    /// Callers must release `conn` first; `search` takes `loaded` before `conn`.
    fn invalidate(&self, name: &str) {
        self.loaded.lock().remove(name);
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collection_row(name)?.is_some())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        if spec.dimension == 0 {
            return Err(Error::Config("collection dimension must be positive".into()));
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO collections (name, dimension, distance, ef_construct, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                spec.name,
                spec.dimension as i64,
                spec.distance.as_str(),
                spec.ef_construct as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                Error::Internal(format!("collection '{}' already exists", spec.name))
            } else {
                db_err(e)
            }
        })?;
        drop(conn);
        self.invalidate(&spec.name);
        info!(
            "Created collection {} (dim={}, distance={})",
            spec.name,
            spec.dimension,
            spec.distance.as_str()
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let deleted = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM points WHERE collection = ?1", params![name])
                .map_err(db_err)?;
            conn.execute("DELETE FROM collections WHERE name = ?1", params![name])
                .map_err(db_err)?
        };
        self.invalidate(name);
        if deleted > 0 {
            info!("Deleted collection {}", name);
        }
        Ok(deleted > 0)
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize> {
        let row = self.require_collection(collection)?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != row.dimension) {
            return Err(Error::Internal(format!(
                "point {} has dimension {}, collection {} expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                row.dimension
            )));
        }

        let written = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().map_err(db_err)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO points (collection, point_id, vector, payload_json)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(collection, point_id)
                         DO UPDATE SET vector = excluded.vector, payload_json = excluded.payload_json",
                    )
                    .map_err(db_err)?;
                for point in &points {
                    let payload = serde_json::to_string(&point.payload)?;
                    stmt.execute(params![
                        collection,
                        point.id.to_string(),
                        encode_vector(&point.vector),
                        payload,
                    ])
                    .map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)?;
            points.len()
        };
        self.invalidate(collection);
        debug!("Upserted {} points into {}", written, collection);
        Ok(written)
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let row = self.require_collection(collection)?;
        if query.len() != row.dimension {
            return Err(Error::Internal(format!(
                "query has dimension {}, collection {} expects {}",
                query.len(),
                collection,
                row.dimension
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // The cache lock is held through the load so a write's invalidate
        // cannot run between reading the rows and caching them.
        let mut loaded = self.loaded.lock();
        if !loaded.contains_key(collection) {
            let fresh = self.load_collection(collection, &row)?;
            loaded.insert(collection.to_string(), fresh);
        }
        let Some(data) = loaded.get(collection) else {
            return Ok(Vec::new());
        };
        if data.matrix.nrows() == 0 {
            return Ok(Vec::new());
        }

        let mut q = Array1::from_vec(query.to_vec());
        if data.distance == Distance::Cosine {
            let norm = q.dot(&q).sqrt();
            if norm < 1e-9 {
                return Ok(Vec::new());
            }
            q /= norm;
        }

        let scores = data.matrix.dot(&q);
        let mut ranked: Vec<(usize, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| filter.map_or(true, |f| f.matches(&data.payloads[*i].metadata)))
            .map(|(i, &s)| (i, s))
            .collect();
        // Stable sort: equal scores keep insertion order
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(i, score)| SearchHit::from((data.payloads[i].clone(), score)))
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.require_collection(collection)?;
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM points WHERE collection = ?1",
                params![collection],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_index() -> (SqliteIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = SqliteIndex::open(dir.path()).unwrap();
        (index, dir)
    }

    fn point(vector: Vec<f32>, text: &str, source: &str, part: u32) -> IndexedPoint {
        IndexedPoint::new(
            vector,
            text.to_string(),
            ChunkMetadata {
                name: format!("{} (part {})", source, part),
                categorie: "txt".into(),
                source: source.to_string(),
                part,
                token_start: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let (index, _dir) = test_index();
        assert!(!index.collection_exists("ENSA_chatbot").await.unwrap());

        index
            .create_collection(&CollectionSpec::dot("ENSA_chatbot", 3, 300))
            .await
            .unwrap();
        assert!(index.collection_exists("ENSA_chatbot").await.unwrap());
        assert_eq!(index.count("ENSA_chatbot").await.unwrap(), 0);

        // Creating twice is an error
        assert!(index
            .create_collection(&CollectionSpec::dot("ENSA_chatbot", 3, 300))
            .await
            .is_err());

        assert!(index.delete_collection("ENSA_chatbot").await.unwrap());
        assert!(!index.delete_collection("ENSA_chatbot").await.unwrap());
        assert!(!index.collection_exists("ENSA_chatbot").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_ranks_by_dot_product() {
        let (index, _dir) = test_index();
        index
            .create_collection(&CollectionSpec::dot("c", 3, 300))
            .await
            .unwrap();
        index
            .upsert(
                "c",
                vec![
                    point(vec![1.0, 0.0, 0.0], "inscription", "/d/a.txt", 1),
                    point(vec![0.0, 1.0, 0.0], "examens", "/d/b.txt", 1),
                    point(vec![0.6, 0.8, 0.0], "calendrier", "/d/c.txt", 1),
                ],
            )
            .await
            .unwrap();

        let hits = index.search("c", &[0.0, 1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "examens");
        assert_eq!(hits[1].text, "calendrier");
        assert!((hits[1].score - 0.8).abs() < 1e-6);
        assert_eq!(hits[0].source(), "/d/b.txt");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let (index, _dir) = test_index();
        index
            .create_collection(&CollectionSpec::dot("c", 2, 300))
            .await
            .unwrap();
        let points = (1..=4)
            .map(|i| point(vec![1.0, 0.0], &format!("chunk {}", i), "/d/a.txt", i))
            .collect();
        index.upsert("c", points).await.unwrap();

        let hits = index.search("c", &[1.0, 0.0], 3, None).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["chunk 1", "chunk 2", "chunk 3"]);
    }

    #[tokio::test]
    async fn test_filter_applies_before_top_k() {
        let (index, _dir) = test_index();
        index
            .create_collection(&CollectionSpec::dot("c", 2, 300))
            .await
            .unwrap();
        index
            .upsert(
                "c",
                vec![
                    point(vec![1.0, 0.0], "best", "/d/a.txt", 1),
                    point(vec![0.9, 0.1], "second", "/d/a.txt", 2),
                    point(vec![0.1, 0.9], "filtered", "/d/b.txt", 1),
                ],
            )
            .await
            .unwrap();

        let filter = MetadataFilter {
            source: Some("/d/b.txt".into()),
            ..Default::default()
        };
        let hits = index
            .search("c", &[1.0, 0.0], 1, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "filtered");
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_unavailable() {
        let (index, _dir) = test_index();
        let err = index.search("nope", &[1.0], 3, None).await.unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let (index, _dir) = test_index();
        index
            .create_collection(&CollectionSpec::dot("c", 3, 300))
            .await
            .unwrap();
        let err = index
            .upsert("c", vec![point(vec![1.0, 0.0], "x", "/d/a.txt", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(index.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writes_invalidate_loaded_matrix() {
        let (index, _dir) = test_index();
        index
            .create_collection(&CollectionSpec::dot("c", 2, 300))
            .await
            .unwrap();
        index
            .upsert("c", vec![point(vec![1.0, 0.0], "first", "/d/a.txt", 1)])
            .await
            .unwrap();
        assert_eq!(index.search("c", &[0.0, 1.0], 5, None).await.unwrap().len(), 1);

        index
            .upsert("c", vec![point(vec![0.0, 1.0], "second", "/d/a.txt", 2)])
            .await
            .unwrap();
        let hits = index.search("c", &[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_search_never_caches_stale_matrix() {
        let (index, _dir) = test_index();
        let index = std::sync::Arc::new(index);
        index
            .create_collection(&CollectionSpec::dot("c", 2, 300))
            .await
            .unwrap();

        let reader = {
            let index = index.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    index.search("c", &[1.0, 1.0], 100, None).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        for i in 0..50 {
            index
                .upsert("c", vec![point(vec![1.0, 0.0], &format!("p{}", i), "/d/a.txt", i)])
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
        reader.await.unwrap();

        let hits = index.search("c", &[1.0, 1.0], 100, None).await.unwrap();
        assert_eq!(hits.len(), 50);
    }

    #[tokio::test]
    async fn test_index_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = SqliteIndex::open(dir.path()).unwrap();
            index
                .create_collection(&CollectionSpec::dot("c", 2, 300))
                .await
                .unwrap();
            index
                .upsert("c", vec![point(vec![0.5, 0.5], "kept", "/d/a.txt", 1)])
                .await
                .unwrap();
        }
        let index = SqliteIndex::open(dir.path()).unwrap();
        assert_eq!(index.count("c").await.unwrap(), 1);
        let hits = index.search("c", &[1.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].text, "kept");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
