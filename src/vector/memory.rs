//! Process-local vector index.

use super::types::{IndexError, Match, VectorRecord};
use super::VectorIndex;
use crate::segment::ChunkMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Namespace {
    dimension: usize,
    records: HashMap<String, (Vec<f32>, ChunkMetadata)>,
}

/// Cosine-similarity index held in memory. Contents are lost when the process exits.
#[derive(Default)]
pub struct InMemoryIndex {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the namespaces currently holding records.
    pub async fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut namespaces = self.namespaces.write().await;
        let dimension = namespaces
            .get(namespace)
            .map(|existing| existing.dimension)
            .unwrap_or(records[0].values.len());
        if let Some(bad) = records.iter().find(|record| record.values.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.values.len(),
            });
        }

        let entry = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                dimension,
                records: HashMap::new(),
            });
        for record in records {
            entry.records.insert(
                record.id.clone(),
                (record.values.clone(), record.metadata.clone()),
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        let namespaces = self.namespaces.read().await;
        let Some(entry) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        if vector.len() != entry.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: entry.dimension,
                actual: vector.len(),
            });
        }

        let mut matches: Vec<Match> = entry
            .records
            .iter()
            .map(|(id, (values, metadata))| Match {
                id: id.clone(),
                score: cosine_similarity(vector, values),
                metadata: metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map_or(0, |entry| entry.records.len()))
    }
}

/// Cosine similarity of two equal-length vectors; zero when either has no magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
