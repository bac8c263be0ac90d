//! HTTP client wrapper mapping namespaces onto Qdrant collections.

use super::record::point_id_for;
use super::types::{
    CountResponse, IndexError, Match, PointPayload, QdrantError, QueryResponse,
    QueryResponseResult, VectorRecord,
};
use super::VectorIndex;
use crate::segment::ChunkMetadata;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

/// Qdrant-backed index: one collection per namespace, cosine distance.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) dimension: usize,
}

impl QdrantIndex {
    /// Construct a client for the instance at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("docchat/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            dimension,
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            dimension,
        })
    }

    async fn create_collection_if_not_exists(&self, collection: &str) -> Result<(), QdrantError> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        tracing::debug!(collection, vector_size = self.dimension, "Creating collection");
        let body = json!({
            "vectors": {
                "size": self.dimension,
                "distance": "Cosine"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        // A concurrent ingestion of the same document may have created it first.
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if self.collection_exists(collection).await? {
            tracing::debug!(collection, "Collection created concurrently");
            return Ok(());
        }
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(collection, error = %error, "Failed to create collection");
        Err(error)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, QdrantError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(operation, error = %error, "Qdrant request failed");
        Err(error)
    }

    fn check_dimension(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.check_dimension(record.values.len())?;
        }
        self.create_collection_if_not_exists(namespace).await?;

        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id_for(&record.id).to_string(),
                    "vector": record.values,
                    "payload": PointPayload {
                        record_id: Some(record.id.clone()),
                        text: record.metadata.text.clone(),
                        page_number: record.metadata.page_number,
                    },
                })
            })
            .collect();

        let response = self
            .request(Method::PUT, &format!("collections/{namespace}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        self.ensure_success(response, "upsert").await?;
        tracing::debug!(namespace, points = records.len(), "Points upserted");
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        self.check_dimension(vector.len())?;
        let body = json!({
            "query": vector,
            "limit": top_k,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{namespace}/points/query"),
            )
            .json(&body)
            .send()
            .await
            .map_err(QdrantError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(namespace, "Query against missing collection");
            return Ok(Vec::new());
        }
        let response = self.ensure_success(response, "query").await?;

        let payload: QueryResponse = response.json().await.map_err(QdrantError::from)?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut matches: Vec<Match> = points
            .into_iter()
            .map(|point| {
                let payload = point.payload.unwrap_or_default();
                Match {
                    id: payload
                        .record_id
                        .unwrap_or_else(|| stringify_point_id(point.id)),
                    score: point.score,
                    metadata: ChunkMetadata {
                        text: payload.text,
                        page_number: payload.page_number,
                    },
                }
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{namespace}"))
            .send()
            .await
            .map_err(QdrantError::from)?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(namespace, "Namespace already absent");
            return Ok(());
        }
        self.ensure_success(response, "delete_namespace").await?;
        tracing::info!(namespace, "Namespace deleted");
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{namespace}/points/count"),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let response = self.ensure_success(response, "count").await?;
        let payload: CountResponse = response.json().await.map_err(QdrantError::from)?;
        Ok(payload.result.count)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::compute_record_id;
    use httpmock::Method::{DELETE, GET, POST, PUT};
    use httpmock::MockServer;

    fn index(server: &MockServer, api_key: Option<&str>) -> QdrantIndex {
        QdrantIndex {
            client: Client::builder()
                .user_agent("docchat-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: api_key.map(str::to_string),
            dimension: 2,
        }
    }

    fn record(content: &str, page: u32) -> VectorRecord {
        VectorRecord {
            id: compute_record_id(content),
            values: vec![0.6, 0.8],
            metadata: ChunkMetadata {
                text: format!("page {page} text"),
                page_number: page,
            },
        }
    }

    #[tokio::test]
    async fn upsert_creates_collection_then_writes_points() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docchat-a");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docchat-a")
                    .header("api-key", "secret")
                    .json_body(json!({ "vectors": { "size": 2, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let rec = record("hello", 1);
        let expected_id = point_id_for(&rec.id).to_string();
        let points = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docchat-a/points")
                    .query_param("wait", "true")
                    .json_body(json!({
                        "points": [{
                            "id": expected_id,
                            "vector": [0.6, 0.8],
                            "payload": {
                                "record_id": rec.id,
                                "text": "page 1 text",
                                "pageNumber": 1
                            }
                        }]
                    }));
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        index(&server, Some("secret"))
            .upsert("docchat-a", std::slice::from_ref(&rec))
            .await
            .expect("upsert");

        exists.assert_async().await;
        create.assert_async().await;
        points.assert_async().await;
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_before_any_request() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.path_contains("/collections");
                then.status(200);
            })
            .await;

        let mut bad = record("hello", 1);
        bad.values = vec![1.0, 0.0, 0.0];
        let error = index(&server, None)
            .upsert("docchat-a", &[bad])
            .await
            .expect_err("dimension");

        assert!(matches!(
            error,
            IndexError::DimensionMismatch { expected: 2, actual: 3 }
        ));
        assert_eq!(any.hits_async().await, 0);
    }

    #[tokio::test]
    async fn query_returns_record_ids_and_metadata() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docchat-a/points/query")
                    .json_body(json!({ "query": [0.6, 0.8], "limit": 5, "with_payload": true }));
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "0d3c5a8e-0000-5000-8000-000000000000",
                                "score": 0.71,
                                "payload": { "record_id": "abc", "text": "second", "pageNumber": 2 }
                            },
                            {
                                "id": "1d3c5a8e-0000-5000-8000-000000000000",
                                "score": 0.93,
                                "payload": { "record_id": "def", "text": "first", "pageNumber": 1 }
                            }
                        ]
                    }
                }));
            })
            .await;

        let matches = index(&server, None)
            .query("docchat-a", &[0.6, 0.8], 5)
            .await
            .expect("query");

        mock.assert_async().await;
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "def");
        assert_eq!(matches[0].metadata.text, "first");
        assert_eq!(matches[0].metadata.page_number, 1);
        assert_eq!(matches[1].id, "abc");
    }

    #[tokio::test]
    async fn query_on_missing_collection_is_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docchat-none/points/query");
                then.status(404)
                    .json_body(json!({ "status": { "error": "Not found" } }));
            })
            .await;

        let matches = index(&server, None)
            .query("docchat-none", &[0.0, 1.0], 5)
            .await
            .expect("query");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn query_surfaces_server_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docchat-a/points/query");
                then.status(500).body("boom");
            })
            .await;

        let error = index(&server, None)
            .query("docchat-a", &[0.0, 1.0], 5)
            .await
            .expect_err("server error");
        match error {
            IndexError::Qdrant(QdrantError::UnexpectedStatus { status, body }) => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_tolerates_missing_collection() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/docchat-gone");
                then.status(404);
            })
            .await;

        index(&server, None)
            .delete_namespace("docchat-gone")
            .await
            .expect("delete");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn count_reads_exact_total() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docchat-a/points/count")
                    .json_body(json!({ "exact": true }));
                then.status(200)
                    .json_body(json!({ "result": { "count": 42 }, "status": "ok" }));
            })
            .await;

        let count = index(&server, None).count("docchat-a").await.expect("count");
        assert_eq!(count, 42);
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            normalize_base_url("http://localhost:6333/").expect("url"),
            "http://localhost:6333/"
        );
        assert_eq!(
            format_endpoint("http://localhost:6333/", "/collections/x"),
            "http://localhost:6333/collections/x"
        );
        assert!(normalize_base_url("not a url").is_err());
    }
}
