//! Qdrant collections over the REST API.
//!
//! Points carry a single named vector (`"default"`) and the flattened chunk
//! payload. Request bodies and response parsing are plain functions so they
//! can be checked without a running server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::index::VectorIndex;
use crate::types::*;
use ensabot_core::{Error, Result};

/// Name of the vector slot every point uses.
pub const VECTOR_NAME: &str = "default";

pub struct QdrantIndex {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

fn unavailable(e: reqwest::Error) -> Error {
    Error::IndexUnavailable(format!("qdrant: {}", e))
}

impl QdrantIndex {
    pub fn new(url: &str, api_key: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        info!("QdrantIndex targeting {}", url);
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| Error::Config(format!("Invalid Qdrant API key: {}", e)))?;
            headers.insert(HeaderName::from_static("api-key"), value);
        }
        Ok(headers)
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    async fn failure(context: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::IndexUnavailable(format!("qdrant {} failed ({}): {}", context, status, body))
    }
}

/// Body for `PUT /collections/{name}`.
pub fn collection_body(spec: &CollectionSpec) -> Value {
    json!({
        "vectors": {
            VECTOR_NAME: {
                "size": spec.dimension,
                "distance": spec.distance.as_str(),
            }
        },
        "hnsw_config": { "ef_construct": spec.ef_construct },
    })
}

/// Qdrant `must` filter with one exact-match condition per set field.
pub fn filter_body(filter: &MetadataFilter) -> Option<Value> {
    let mut must = Vec::new();
    if let Some(name) = &filter.name {
        must.push(json!({ "key": "name", "match": { "value": name } }));
    }
    if let Some(categorie) = &filter.categorie {
        must.push(json!({ "key": "categorie", "match": { "value": categorie } }));
    }
    if let Some(source) = &filter.source {
        must.push(json!({ "key": "source", "match": { "value": source } }));
    }
    if let Some(part) = filter.part {
        must.push(json!({ "key": "part", "match": { "value": part } }));
    }
    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

/// Body for `POST /collections/{name}/points/search`.
pub fn search_body(query: &[f32], top_k: usize, filter: Option<&MetadataFilter>) -> Value {
    let mut body = json!({
        "vector": { "name": VECTOR_NAME, "vector": query },
        "limit": top_k,
        "with_payload": true,
    });
    if let Some(f) = filter.and_then(filter_body) {
        body["filter"] = f;
    }
    body
}

/// Body for `PUT /collections/{name}/points`.
pub fn upsert_body(points: &[IndexedPoint]) -> Result<Value> {
    let points = points
        .iter()
        .map(|p| {
            Ok(json!({
                "id": p.id.to_string(),
                "vector": { VECTOR_NAME: p.vector },
                "payload": serde_json::to_value(&p.payload)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({ "points": points }))
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchEntry>,
}

#[derive(Deserialize)]
struct SearchEntry {
    score: f32,
    payload: Option<Value>,
}

/// Ranked hits from a search response. Points without a readable payload are
/// skipped.
pub fn parse_search_response(body: Value) -> Result<Vec<SearchHit>> {
    let response: SearchResponse = serde_json::from_value(body)?;
    let mut hits = Vec::with_capacity(response.result.len());
    for entry in response.result {
        let Some(payload) = entry.payload else {
            continue;
        };
        match serde_json::from_value::<PointPayload>(payload) {
            Ok(payload) => hits.push(SearchHit::from((payload, entry.score))),
            Err(e) => warn!("Skipping point with malformed payload: {}", e),
        }
    }
    Ok(hits)
}

/// Point count from a `points/count` response.
pub fn parse_count_response(body: &Value) -> Result<usize> {
    body.pointer("/result/count")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .ok_or_else(|| Error::IndexUnavailable("qdrant count response missing result.count".into()))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.collection_url(name))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(unavailable)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::failure("collection lookup", response).await),
        }
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let response = self
            .http
            .put(self.collection_url(&spec.name))
            .headers(self.headers()?)
            .json(&collection_body(spec))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Self::failure("create collection", response).await);
        }
        info!(
            "Created Qdrant collection {} (dim={}, distance={})",
            spec.name,
            spec.dimension,
            spec.distance.as_str()
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if !self.collection_exists(name).await? {
            return Ok(false);
        }
        let response = self
            .http
            .delete(self.collection_url(name))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Self::failure("delete collection", response).await);
        }
        info!("Deleted Qdrant collection {}", name);
        Ok(true)
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let response = self
            .http
            .put(format!("{}/points", self.collection_url(collection)))
            .query(&[("wait", "true")])
            .headers(self.headers()?)
            .json(&upsert_body(&points)?)
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Self::failure("upsert", response).await);
        }
        debug!("Upserted {} points into {}", points.len(), collection);
        Ok(points.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .http
            .post(format!("{}/points/search", self.collection_url(collection)))
            .headers(self.headers()?)
            .json(&search_body(query, top_k, filter))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Self::failure("search", response).await);
        }
        let body: Value = response.json().await.map_err(unavailable)?;
        parse_search_response(body)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let response = self
            .http
            .post(format!("{}/points/count", self.collection_url(collection)))
            .headers(self.headers()?)
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Self::failure("count", response).await);
        }
        let body: Value = response.json().await.map_err(unavailable)?;
        parse_count_response(&body)
    }
}
