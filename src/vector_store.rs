//! Qdrant-compatible REST client implementing [`VectorStore`].
//!
//! # Wire contract
//!
//! | Operation             | Request                                                   |
//! |-----------------------|-----------------------------------------------------------|
//! | existence check       | `GET /collections/{c}` (404 means absent)                 |
//! | create collection     | `PUT /collections/{c}` cosine distance, int8 quantization |
//! | payload index         | `PUT /collections/{c}/index?wait=true`                    |
//! | replace a file        | `POST /collections/{c}/points/batch?wait=true`            |
//! | upsert captured fact  | `PUT /collections/{c}/points?wait=true`                   |
//! | delete captured fact  | `POST /collections/{c}/points/delete?wait=true`           |
//! | similarity search     | `POST /collections/{c}/points/search`                     |
//! | list captured facts   | `POST /collections/{c}/points/scroll`                     |
//! | health                | `GET /`                                                   |
//!
//! Every mutating call passes `wait=true`, so a successful response means
//! the change is visible to subsequent searches.
//!
//! Replacing a file sends one batch request holding a filtered delete
//! followed by an upsert. Qdrant applies the batch as a unit, which is what
//! keeps concurrent readers from observing a half-replaced file.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use vault_recall_core::models::{CaptureCategory, CapturedMemory, MemorySource};
use vault_recall_core::store::{CapturedPage, Point, PointPayload, ScoredPoint, VectorStore};

use crate::config::VectorStoreConfig;

/// Payload fields that get a keyword index.
const KEYWORD_FIELDS: [&str; 3] = ["file", "category", "source"];

#[derive(Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct RawPoint {
    id: Value,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<RawPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

/// Client for one Qdrant collection.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Vector store unreachable during {}", what))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Vector store {} failed with {}: {}", what, status, body_text);
        }
        Ok(response)
    }

    async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, self.url(""))
            .send()
            .await
            .context("Vector store unreachable during collection check")?;
        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => {
                let body_text = response.text().await.unwrap_or_default();
                bail!("Vector store collection check failed with {}: {}", s, body_text)
            }
        }
    }

    async fn create_index(&self, field: &str, schema: Value) -> Result<()> {
        let body = json!({ "field_name": field, "field_schema": schema });
        self.send(
            self.request(reqwest::Method::PUT, self.url("/index?wait=true"))
                .json(&body),
            "payload index creation",
        )
        .await?;
        Ok(())
    }
}

fn point_json(point: &Point) -> Value {
    json!({
        "id": point.id,
        "vector": point.vector,
        "payload": point.payload,
    })
}

fn file_filter(file: &str) -> Value {
    json!({ "must": [ { "key": "file", "match": { "value": file } } ] })
}

fn captured_filter(category: Option<CaptureCategory>) -> Value {
    let mut must = vec![json!({ "key": "source", "match": { "value": MemorySource::Captured.as_str() } })];
    if let Some(c) = category {
        must.push(json!({ "key": "category", "match": { "value": c.as_str() } }));
    }
    json!({ "must": must })
}

impl RawPoint {
    fn into_scored(self) -> Option<ScoredPoint> {
        Some(ScoredPoint {
            id: self.id.as_u64()?,
            score: self.score,
            payload: self.payload?,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        if !self.collection_exists().await? {
            let body = json!({
                "vectors": { "size": dimensions, "distance": "Cosine" },
                "quantization_config": {
                    "scalar": { "type": "int8", "quantile": 0.99, "always_ram": true }
                }
            });
            self.send(
                self.request(reqwest::Method::PUT, self.url("")).json(&body),
                "collection creation",
            )
            .await?;
            tracing::info!(collection = %self.collection, dimensions, "created vector collection");
        }

        for field in KEYWORD_FIELDS {
            self.create_index(field, json!("keyword")).await?;
        }
        self.create_index(
            "capturedAt",
            json!({ "type": "integer", "lookup": false, "range": true, "is_principal": true }),
        )
        .await?;
        Ok(())
    }

    async fn batch_upsert_file(&self, file: &str, points: Vec<Point>) -> Result<()> {
        let mut operations = vec![json!({ "delete": { "filter": file_filter(file) } })];
        if !points.is_empty() {
            let points: Vec<Value> = points.iter().map(point_json).collect();
            operations.push(json!({ "upsert": { "points": points } }));
        }
        let body = json!({ "operations": operations });
        self.send(
            self.request(reqwest::Method::POST, self.url("/points/batch?wait=true"))
                .json(&body),
            "batch upsert",
        )
        .await?;
        Ok(())
    }

    async fn upsert_captured(&self, memory: &CapturedMemory, vector: Vec<f32>) -> Result<()> {
        let point = Point {
            id: memory.id,
            vector,
            payload: PointPayload::captured(memory),
        };
        let body = json!({ "points": [point_json(&point)] });
        self.send(
            self.request(reqwest::Method::PUT, self.url("/points?wait=true"))
                .json(&body),
            "captured upsert",
        )
        .await?;
        Ok(())
    }

    async fn list_captured(
        &self,
        category: Option<CaptureCategory>,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<CapturedPage> {
        let mut body = json!({
            "filter": captured_filter(category),
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url("/points/scroll"))
                    .json(&body),
                "scroll",
            )
            .await?;
        let parsed: ApiResponse<ScrollResult> =
            response.json().await.context("Invalid scroll response")?;

        let items = parsed
            .result
            .points
            .into_iter()
            .filter_map(RawPoint::into_scored)
            .filter_map(|p| p.payload.to_captured(p.id))
            .collect();
        let next_offset = parsed.result.next_page_offset.and_then(|v| v.as_u64());
        Ok(CapturedPage { items, next_offset })
    }

    async fn delete_captured(&self, id: u64) -> Result<()> {
        let mut filter = captured_filter(None);
        if let Some(must) = filter["must"].as_array_mut() {
            must.push(json!({ "has_id": [id] }));
        }
        let body = json!({ "filter": filter });
        self.send(
            self.request(reqwest::Method::POST, self.url("/points/delete?wait=true"))
                .json(&body),
            "captured delete",
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredPoint>> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url("/points/search"))
                    .json(&body),
                "search",
            )
            .await?;
        let parsed: ApiResponse<Vec<RawPoint>> =
            response.json().await.context("Invalid search response")?;
        Ok(parsed
            .result
            .into_iter()
            .filter_map(RawPoint::into_scored)
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.send(
            self.request(reqwest::Method::GET, format!("{}/", self.base_url)),
            "health check",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_recall_core::chunk::chunk_text;
    use vault_recall_core::metadata::FileMetadata;
    use vault_recall_core::store::build_chunk_points;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> QdrantStore {
        QdrantStore::new(&VectorStoreConfig {
            url: server.uri(),
            collection: "mem".to_string(),
            api_key: Some("secret".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": result, "status": "ok" }))
    }

    async fn bodies(server: &MockServer, suffix: &str) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/mem"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/mem"))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/mem/index"))
            .respond_with(ok(json!({"status": "acknowledged"})))
            .expect(4)
            .mount(&server)
            .await;

        store(&server).ensure_collection(768).await.unwrap();

        let create = &bodies(&server, "/collections/mem").await
            .into_iter()
            .find(|b| b.get("vectors").is_some())
            .unwrap();
        assert_eq!(create["vectors"]["size"], 768);
        assert_eq!(create["vectors"]["distance"], "Cosine");
        assert_eq!(create["quantization_config"]["scalar"]["type"], "int8");
        assert_eq!(create["quantization_config"]["scalar"]["quantile"], 0.99);

        let indexes = bodies(&server, "/index").await;
        let principal = indexes.iter().find(|b| b["field_name"] == "capturedAt").unwrap();
        assert_eq!(principal["field_schema"]["is_principal"], true);
        assert_eq!(principal["field_schema"]["range"], true);
    }

    #[tokio::test]
    async fn test_ensure_collection_existing_only_indexes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/mem"))
            .respond_with(ok(json!({"status": "green"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/mem"))
            .respond_with(ok(json!(true)))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/mem/index"))
            .respond_with(ok(json!({"status": "acknowledged"})))
            .expect(4)
            .mount(&server)
            .await;

        store(&server).ensure_collection(768).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_upsert_is_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/mem/points/batch"))
            .respond_with(ok(json!([{"status": "completed"}])))
            .expect(1)
            .mount(&server)
            .await;

        let chunks = chunk_text("vault/a.md", "one\ntwo", 400, 0);
        let points =
            build_chunk_points(&chunks, vec![vec![0.5, 0.5]], &FileMetadata::default(), &[]).unwrap();
        store(&server).batch_upsert_file("vault/a.md", points).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].url.query(), Some("wait=true"));
        assert_eq!(requests[0].headers.get("api-key").unwrap(), "secret");

        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let ops = body["operations"].as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["delete"]["filter"]["must"][0]["match"]["value"], "vault/a.md");
        assert_eq!(ops[1]["upsert"]["points"][0]["id"], chunks[0].id);
        assert_eq!(ops[1]["upsert"]["points"][0]["payload"]["startLine"], 1);
    }

    #[tokio::test]
    async fn test_batch_upsert_failure_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/mem/points/batch"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = store(&server)
            .batch_upsert_file("vault/a.md", vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/mem/points/search"))
            .respond_with(ok(json!([
                {"id": 7, "score": 0.91, "payload": {"file": "vault/a.md", "startLine": 1, "endLine": 4, "text": "hello", "source": "vault"}},
                {"id": "3f1c2b4e-0000-0000-0000-000000000000", "score": 0.5, "payload": {"file": "x", "text": "y", "source": "vault"}}
            ])))
            .mount(&server)
            .await;

        let hits = store(&server).search(&[0.1, 0.2], 5, 0.3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 7);
        assert_eq!(hits[0].payload.end_line, 4);

        let body = &bodies(&server, "/points/search").await[0];
        assert_eq!(body["score_threshold"], 0.3);
        assert_eq!(body["with_payload"], true);
    }

    #[tokio::test]
    async fn test_list_captured_scroll_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/mem/points/scroll"))
            .respond_with(ok(json!({
                "points": [
                    {"id": 11, "payload": {"file": "captured/preference", "text": "I prefer tea", "source": "captured", "category": "preference", "capturedAt": 1700000000000i64}}
                ],
                "next_page_offset": 12
            })))
            .mount(&server)
            .await;

        let page = store(&server)
            .list_captured(Some(CaptureCategory::Preference), 1, Some(5))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].category, CaptureCategory::Preference);
        assert_eq!(page.next_offset, Some(12));

        let body = &bodies(&server, "/points/scroll").await[0];
        assert_eq!(body["offset"], 5);
        assert_eq!(body["filter"]["must"][1]["match"]["value"], "preference");
    }

    #[tokio::test]
    async fn test_delete_captured_filters_by_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/collections/mem/points/delete$"))
            .respond_with(ok(json!({"status": "completed"})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).delete_captured(99).await.unwrap();
        let body = &bodies(&server, "/points/delete").await[0];
        assert_eq!(body["filter"]["must"][0]["match"]["value"], "captured");
        assert_eq!(body["filter"]["must"][1]["has_id"][0], 99);
    }

    #[tokio::test]
    async fn test_duplicate_check_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/mem/points/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let check = store(&server).search_for_duplicates(&[1.0], 0.95).await;
        assert!(!check.exists);
        assert!(check.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let s = QdrantStore::new(&VectorStoreConfig {
            url: "http://127.0.0.1:1".to_string(),
            collection: "mem".to_string(),
            api_key: None,
            timeout_secs: 1,
        })
        .unwrap();
        assert!(s.health_check().await.is_err());
    }
}
