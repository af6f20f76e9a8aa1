//! Router tests against a temporary SQLite index and a scripted LLM.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::stream;
use ndarray::Array1;
use parking_lot::Mutex;
use tempfile::TempDir;
use tower::ServiceExt;

use ensabot_chat::{
    BoxedStream, ChatMessage, CompletionBackend, FailoverGenerator, GenerationError,
    GenerationParams, StreamChunk,
};
use ensabot_core::{EnsaBotConfig, IndexBackendKind, Result, RetrievalMode};
use ensabot_infer::{EmbedderBackend, TextTokenizer};
use ensabot_server::{build_router, indexing, AppState};
use ensabot_store::SqliteIndex;

const DIM: usize = 64;

struct WordTokenizer {
    vocab: Mutex<Vec<String>>,
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut vocab = self.vocab.lock();
        Ok(text
            .split_whitespace()
            .map(|w| match vocab.iter().position(|v| v == w) {
                Some(i) => i as u32,
                None => {
                    vocab.push(w.to_string());
                    (vocab.len() - 1) as u32
                }
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self.vocab.lock();
        Ok(ids
            .iter()
            .map(|&id| vocab[id as usize].as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

struct HashEmbedder;

impl EmbedderBackend for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Array1<f32>> {
        let mut v = Array1::zeros(DIM);
        for word in text.split_whitespace() {
            let h = word
                .to_lowercase()
                .bytes()
                .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            v[(h % DIM as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// First key is rate limited; the second answers with a fixed text.
struct TwoKeyBackend;

impl CompletionBackend for TwoKeyBackend {
    fn stream(
        &self,
        api_key: &str,
        _messages: Vec<ChatMessage>,
        _params: &GenerationParams,
    ) -> BoxedStream {
        let chunks = if api_key == "k1" {
            vec![StreamChunk::Error(GenerationError::RateLimited)]
        } else {
            vec![
                StreamChunk::Token("Les inscriptions ".into()),
                StreamChunk::Token("ont lieu en septembre.".into()),
                StreamChunk::Done { tokens_used: 2 },
            ]
        };
        Box::pin(stream::iter(chunks))
    }
}

fn write_corpus(root: &Path) {
    std::fs::create_dir_all(root.join("emploi-temps")).unwrap();
    std::fs::create_dir_all(root.join("scolarite")).unwrap();
    std::fs::write(
        root.join("emploi-temps/gi2.json"),
        r#"{"Lundi": [{"Matière": "Algorithmique", "Heure": "08:00-10:00"}]}"#,
    )
    .unwrap();
    std::fs::write(
        root.join("scolarite/inscription.txt"),
        "Les inscriptions administratives ont lieu en septembre.",
    )
    .unwrap();
}

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    _dirs: (TempDir, TempDir),
}

fn app() -> TestApp {
    app_with_keys(&["k1", "k2"])
}

fn app_with_keys(keys: &[&str]) -> TestApp {
    let data = TempDir::new().unwrap();
    write_corpus(data.path());
    let db = TempDir::new().unwrap();

    let mut config = EnsaBotConfig::from_lookup(|_| None).unwrap();
    config.data_root = data.path().to_path_buf();
    config.index.backend = IndexBackendKind::Sqlite;
    config.index.local_dir = db.path().to_path_buf();
    config.retrieval.mode = RetrievalMode::Default;
    config.retrieval.top_k = 2;

    let index = Arc::new(SqliteIndex::open(db.path()).unwrap());
    let generator = Arc::new(FailoverGenerator::new(
        Arc::new(TwoKeyBackend),
        keys.iter().map(|k| k.to_string()).collect(),
        GenerationParams::from(&config.generation),
    ));
    let tokenizer: Arc<dyn TextTokenizer> = Arc::new(WordTokenizer {
        vocab: Mutex::new(Vec::new()),
    });
    let state = Arc::new(AppState::new(
        config,
        Arc::new(HashEmbedder),
        Some(tokenizer),
        index,
        generator,
    ));
    TestApp {
        router: build_router(state.clone()),
        state,
        _dirs: (data, db),
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let response = app.router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["llmKeys"], 2);
    assert_eq!(json["backend"], "sqlite");
    assert_eq!(json["embeddingModel"], "dangvantuan/sentence-camembert-base");
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let app = app();
    let response = app
        .router
        .oneshot(post_json("/api/query", serde_json::json!({ "query": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_malformed_body_gets_json_error() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/query")
        .header("content-type", "application/json")
        .body(Body::from("{\"query\": "))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("erreur"));
}

#[tokio::test]
async fn test_missing_query_field_gets_json_error() {
    let app = app();
    let response = app
        .router
        .oneshot(post_json(
            "/api/query/stream",
            serde_json::json!({ "question": "inscriptions" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_overlong_query_is_rejected() {
    let app = app();
    let query = "a".repeat(2001);
    let response = app
        .router
        .oneshot(post_json("/api/query", serde_json::json!({ "query": query })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_without_index_is_unavailable() {
    let app = app();
    let response = app
        .router
        .oneshot(post_json(
            "/api/query",
            serde_json::json!({ "query": "inscriptions" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_rebuild_then_status() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/index/rebuild", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["indexed"], 2);
    assert_eq!(json["documents"], 2);
    assert_eq!(json["skipped"], 0);

    let response = app.router.oneshot(get("/api/index/status")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["collection"], "ENSA_chatbot");
    assert_eq!(json["available"], true);
    assert_eq!(json["points"], 2);
}

#[tokio::test]
async fn test_concurrent_rebuild_conflicts() {
    let app = app();
    let _running = app.state.rebuild_gate.lock().await;
    let response = app
        .router
        .oneshot(post_json("/api/index/rebuild", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_query_answers_with_sources() {
    let app = app();
    indexing::rebuild(&app.state).await.unwrap();

    let response = app
        .router
        .oneshot(post_json(
            "/api/query",
            serde_json::json!({ "query": "inscriptions administratives septembre", "top_k": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(
        json["response"],
        "Les inscriptions ont lieu en septembre.\n\nSources: inscription.txt"
    );
    assert_eq!(json["sources"], serde_json::json!(["inscription.txt"]));
}

#[tokio::test]
async fn test_stream_emits_sse_events() {
    let app = app();
    indexing::rebuild(&app.state).await.unwrap();

    let response = app
        .router
        .oneshot(post_json(
            "/api/query/stream",
            serde_json::json!({ "query": "inscriptions administratives septembre", "mode": "default" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_text(response).await;
    let events: Vec<serde_json::Value> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["token", "token", "done", "sources"]);
    assert_eq!(events[0]["content"], "Les inscriptions ");
    assert_eq!(events[3]["sources"][0], "inscription.txt");
}

#[tokio::test]
async fn test_startup_build_runs_once() {
    let app = app();
    let first = indexing::ensure_index(&app.state).await.unwrap();
    assert_eq!(first.map(|r| r.indexed), Some(2));
    let second = indexing::ensure_index(&app.state).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn test_query_fails_with_503_when_every_key_fails() {
    let app = app_with_keys(&["k1"]);
    indexing::rebuild(&app.state).await.unwrap();

    let response = app
        .router
        .oneshot(post_json(
            "/api/query",
            serde_json::json!({ "query": "inscriptions administratives septembre" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["response"].as_str().unwrap().contains("limite"));
    assert_eq!(json["sources"], serde_json::json!([]));
}

#[tokio::test]
async fn test_stream_reports_single_error_event_when_every_key_fails() {
    let app = app_with_keys(&["k1"]);
    indexing::rebuild(&app.state).await.unwrap();

    let response = app
        .router
        .oneshot(post_json(
            "/api/query/stream",
            serde_json::json!({ "query": "inscriptions administratives septembre" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    let events: Vec<serde_json::Value> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["done"], true);
    assert!(events[0]["content"].as_str().unwrap().contains("limite"));
}
