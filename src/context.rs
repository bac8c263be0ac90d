//! Context retrieval for chat questions and note assists.

use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::vector::{Match, QueryError, VectorIndex, namespace_with_prefix};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Retrieval knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSettings {
    /// Nearest neighbours requested from the index.
    pub top_k: usize,
    /// Matches must score strictly above this.
    pub score_threshold: f32,
    /// Maximum context length in characters.
    pub max_chars: usize,
    /// Namespace prefix; must match the one used at ingestion.
    pub namespace_prefix: String,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ContextSettings {
    /// Settings described by the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.context_top_k,
            score_threshold: config.context_score_threshold,
            max_chars: config.context_max_chars,
            namespace_prefix: config.namespace_prefix.clone(),
        }
    }
}

/// Errors raised while assembling context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The query could not be embedded.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The similarity query failed.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The caller abandoned the request.
    #[error("context retrieval cancelled")]
    Cancelled,
}

/// Finds the stored page text most relevant to a query.
pub struct ContextRetriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: ContextSettings,
}

impl ContextRetriever {
    /// Build a retriever over the given embedder and index.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    /// Context for `query` from the document stored under `document_key`.
    ///
    /// Returns an empty string when nothing scores above the threshold. The query is embedded
    /// once, without retry.
    pub async fn get_context(
        &self,
        query: &str,
        document_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ContextError> {
        let namespace = namespace_with_prefix(&self.settings.namespace_prefix, document_key);
        let vector = match self.embedder.embed(query, cancel).await {
            Ok(vector) => vector,
            Err(EmbeddingError::Cancelled) => return Err(ContextError::Cancelled),
            Err(error) => return Err(error.into()),
        };

        let lookup = self.index.query(&namespace, &vector, self.settings.top_k);
        let matches = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContextError::Cancelled),
            result = lookup => result.map_err(|source| QueryError {
                namespace: namespace.clone(),
                source,
            })?,
        };

        let context = assemble_context(
            matches,
            self.settings.score_threshold,
            self.settings.max_chars,
        );
        tracing::debug!(
            namespace = %namespace,
            chars = context.chars().count(),
            "Assembled context"
        );
        Ok(context)
    }
}

/// Keep matches scoring above `threshold`, best first, join their text with newlines, and cap the
/// result at `max_chars` characters.
pub fn assemble_context(mut matches: Vec<Match>, threshold: f32, max_chars: usize) -> String {
    matches.retain(|candidate| candidate.score > threshold);
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    let joined = matches
        .iter()
        .map(|candidate| candidate.metadata.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => joined[..cut].to_string(),
        None => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::ChunkMetadata;
    use crate::vector::{InMemoryIndex, VectorRecord, namespace_for};
    use async_trait::async_trait;
    use reqwest::StatusCode;

    fn candidate(score: f32, text: &str) -> Match {
        Match {
            id: text.to_string(),
            score,
            metadata: ChunkMetadata {
                text: text.to_string(),
                page_number: 1,
            },
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let context = assemble_context(
            vec![candidate(0.7, "boundary"), candidate(0.7001, "above")],
            0.7,
            3000,
        );
        assert_eq!(context, "above");
    }

    #[test]
    fn joins_best_first() {
        let context = assemble_context(
            vec![
                candidate(0.75, "P2"),
                candidate(0.9, "P1"),
                candidate(0.65, "P3"),
            ],
            0.7,
            3000,
        );
        assert_eq!(context, "P1\nP2");
    }

    #[test]
    fn caps_length_in_characters() {
        let long = "é".repeat(5000);
        let context = assemble_context(vec![candidate(0.99, &long)], 0.7, 3000);
        assert_eq!(context.chars().count(), 3000);
        assert!(long.starts_with(&context));
    }

    #[test]
    fn nothing_relevant_yields_empty_context() {
        assert_eq!(
            assemble_context(vec![candidate(0.2, "noise")], 0.7, 3000),
            ""
        );
        assert_eq!(assemble_context(Vec::new(), 0.7, 3000), "");
    }

    /// Returns a fixed vector, or a fixed error.
    struct FixedEmbedder(Result<Vec<f32>, StatusCode>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            _text: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.0.clone().map_err(|status| EmbeddingError::Api {
                status,
                message: "unavailable".into(),
            })
        }
    }

    async fn seeded_index(namespace: &str) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        let records = [
            ([1.0, 0.0], "Page one text", 1),
            ([0.8, 0.6], "Page two text", 2),
            ([0.0, 1.0], "Unrelated page", 3),
        ]
        .into_iter()
        .map(|(values, text, page)| VectorRecord {
            id: text.to_string(),
            values: values.to_vec(),
            metadata: ChunkMetadata {
                text: text.to_string(),
                page_number: page,
            },
        })
        .collect::<Vec<_>>();
        index.upsert(namespace, &records).await.expect("seed");
        index
    }

    #[tokio::test]
    async fn retrieves_relevant_pages_for_document() {
        let index = seeded_index(&namespace_for("uploads/1paper.pdf")).await;
        let retriever = ContextRetriever::new(
            Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0]))),
            index,
            ContextSettings::default(),
        );

        let context = retriever
            .get_context("what is on page one?", "uploads/1paper.pdf", &CancellationToken::new())
            .await
            .expect("context");

        assert_eq!(context, "Page one text\nPage two text");
    }

    #[tokio::test]
    async fn other_documents_contribute_nothing() {
        let index = seeded_index(&namespace_for("uploads/1paper.pdf")).await;
        let retriever = ContextRetriever::new(
            Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0]))),
            index,
            ContextSettings::default(),
        );

        let context = retriever
            .get_context("anything", "uploads/2other.pdf", &CancellationToken::new())
            .await
            .expect("context");

        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let retriever = ContextRetriever::new(
            Arc::new(FixedEmbedder(Err(StatusCode::SERVICE_UNAVAILABLE))),
            Arc::new(InMemoryIndex::new()),
            ContextSettings::default(),
        );

        let error = retriever
            .get_context("question", "uploads/1paper.pdf", &CancellationToken::new())
            .await
            .expect_err("embedding failure");

        assert!(matches!(error, ContextError::Embedding(EmbeddingError::Api { .. })));
    }

    #[tokio::test]
    async fn index_failure_propagates_as_query_error() {
        let namespace = namespace_for("uploads/1paper.pdf");
        let index = seeded_index(&namespace).await;
        let retriever = ContextRetriever::new(
            Arc::new(FixedEmbedder(Ok(vec![1.0, 0.0, 0.0]))),
            index,
            ContextSettings::default(),
        );

        let error = retriever
            .get_context("question", "uploads/1paper.pdf", &CancellationToken::new())
            .await
            .expect_err("dimension mismatch");

        match error {
            ContextError::Query(query) => assert_eq!(query.namespace, namespace),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
