//! Records, matches, and errors shared by the vector index backends.

use crate::segment::ChunkMetadata;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One embedded chunk as stored in a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Content-addressed identifier (hex SHA-256 of the chunk content).
    pub id: String,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// Page metadata returned with query matches.
    pub metadata: ChunkMetadata,
}

/// A scored query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// Record identifier.
    pub id: String,
    /// Cosine similarity; higher is closer.
    pub score: f32,
    /// Metadata stored with the record.
    pub metadata: ChunkMetadata,
}

/// Outcome of [`super::upsert_batches`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Batches the index accepted.
    pub succeeded_batches: usize,
    /// Batches that failed and were skipped.
    pub failed_batches: usize,
    /// Records contained in the accepted batches.
    pub upserted_records: usize,
}

/// Errors returned while talking to Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Backend failure underlying every index operation error.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Qdrant request failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// A vector did not match the namespace dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the namespace.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

/// A batch that the index rejected. Logged and skipped by [`super::upsert_batches`].
#[derive(Debug, Error)]
#[error("upsert of batch {batch_index} ({records} records) into '{namespace}' failed: {source}")]
pub struct UpsertBatchError {
    /// Target namespace.
    pub namespace: String,
    /// Zero-based batch position.
    pub batch_index: usize,
    /// Records in the failed batch.
    pub records: usize,
    /// Backend failure.
    #[source]
    pub source: IndexError,
}

/// Similarity query failed.
#[derive(Debug, Error)]
#[error("query against namespace '{namespace}' failed: {source}")]
pub struct QueryError {
    /// Queried namespace.
    pub namespace: String,
    /// Backend failure.
    #[source]
    pub source: IndexError,
}

/// Namespace removal failed.
#[derive(Debug, Error)]
#[error("deleting namespace '{namespace}' failed: {source}")]
pub struct NamespaceDeleteError {
    /// Namespace that could not be removed.
    pub namespace: String,
    /// Backend failure.
    #[source]
    pub source: IndexError,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<PointPayload>,
}

/// Payload stored with every Qdrant point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PointPayload {
    #[serde(default)]
    pub(crate) record_id: Option<String>,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default, rename = "pageNumber")]
    pub(crate) page_number: u32,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: usize,
}
