//! Vector index abstraction, namespaces, and batched writes.
//!
//! Each document owns one namespace. Ingestion is the only writer, context retrieval only reads,
//! and document deletion drops the whole namespace. Backends report [`IndexError`]; callers wrap
//! it in the operation-specific error ([`QueryError`], [`NamespaceDeleteError`],
//! [`UpsertBatchError`]).

mod batch;
mod memory;
mod namespace;
mod qdrant;
mod record;
mod types;

pub use batch::{DEFAULT_UPSERT_BATCH_SIZE, upsert_batches};
pub use memory::InMemoryIndex;
pub use namespace::{DEFAULT_NAMESPACE_PREFIX, namespace_for, namespace_with_prefix};
pub use qdrant::QdrantIndex;
pub use record::compute_record_id;
pub use types::{
    IndexError, Match, NamespaceDeleteError, QdrantError, QueryError, UpsertBatchError,
    UpsertSummary, VectorRecord,
};

use crate::config::{Config, VectorBackend};
use async_trait::async_trait;
use std::sync::Arc;

/// Namespaced storage of embedding vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by id. The namespace is created on first write.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError>;

    /// Up to `top_k` nearest records, highest score first. A missing namespace yields no matches.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError>;

    /// Remove the namespace and all of its records. Removing a missing namespace succeeds.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError>;

    /// Number of records stored in the namespace.
    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;
}

/// Build the configured vector index.
pub fn build_vector_index(config: &Config) -> Result<Arc<dyn VectorIndex>, QdrantError> {
    let index: Arc<dyn VectorIndex> = match config.vector_backend {
        VectorBackend::Qdrant => Arc::new(QdrantIndex::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.embedding_dimension,
            config.http_timeout(),
        )?),
        VectorBackend::Memory => {
            tracing::warn!("Using in-memory vector index; namespaces are lost on restart");
            Arc::new(InMemoryIndex::new())
        }
    };
    Ok(index)
}
