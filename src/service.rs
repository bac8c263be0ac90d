//! Document service wiring storage, ingestion, retrieval, and chat together.

use crate::{
    chat::{
        CHAT_TEMPERATURE, ChatClient, ChatError, ChatMessage, ChatStream, NOTE_TEMPERATURE,
        OpenAiChatClient, build_note_prompt, chat_messages, last_user_message,
    },
    config::Config,
    context::{ContextError, ContextRetriever, ContextSettings},
    embedding::{EmbeddingClient, EmbeddingError, build_embedding_client},
    extract::{LopdfExtractor, PdfExtractor},
    ingest::{IngestError, IngestPipeline, IngestSettings, IngestionReport},
    metrics::{IngestMetrics, MetricsSnapshot},
    segment::{ChunkingError, Segmenter, SegmenterConfig},
    storage::{
        DeleteOutcome, ObjectStore, StorageConfigError, UploadError, UploadedDocument,
        build_object_store,
    },
    vector::{NamespaceDeleteError, QdrantError, VectorIndex, build_vector_index},
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised while assembling the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Object store settings were incomplete.
    #[error(transparent)]
    Storage(#[from] StorageConfigError),
    /// Embedding client could not be constructed.
    #[error("failed to build embedding client: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector index client could not be constructed.
    #[error("failed to build vector index: {0}")]
    VectorIndex(#[from] QdrantError),
    /// Chat client could not be constructed.
    #[error("failed to build chat client: {0}")]
    Chat(#[from] ChatError),
    /// Tokenizer for the embedding model could not be loaded.
    #[error(transparent)]
    Segmenter(#[from] ChunkingError),
}

/// Errors surfaced by [`DocChatApi`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request itself was unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Storing the blob failed.
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// Ingestion aborted.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Context lookup failed.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Completion failed.
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// A stored upload together with its public location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Key and original name of the stored blob.
    #[serde(flatten)]
    pub document: UploadedDocument,
    /// Public URL of the blob.
    pub url: String,
}

/// Outcome of removing a document's blob and vectors.
///
/// Both removals are always attempted; neither failure stops the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Blob removal outcome.
    pub blob: DeleteOutcome,
    /// Whether the document namespace was removed.
    pub namespace_deleted: bool,
    /// First failure encountered, blob before namespace.
    pub first_error: Option<String>,
}

/// Tunables for the service.
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    /// Ingestion knobs.
    pub ingest: IngestSettings,
    /// Retrieval knobs.
    pub context: ContextSettings,
}

impl ServiceSettings {
    /// Settings described by the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            ingest: IngestSettings::from_config(config),
            context: ContextSettings::from_config(config),
        }
    }
}

/// Operations exposed to outer surfaces (HTTP, CLI).
#[async_trait]
pub trait DocChatApi: Send + Sync {
    /// Store an uploaded PDF.
    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadReceipt, ServiceError>;

    /// Turn the stored PDF into vectors in its namespace.
    async fn ingest_document(
        &self,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, ServiceError>;

    /// Relevant page text for `query` from the document under `file_key`.
    async fn context_for(
        &self,
        query: &str,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError>;

    /// Stream an answer to the last user message, grounded in the document.
    async fn chat_stream(
        &self,
        file_key: &str,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ServiceError>;

    /// Answer a question about text selected in a note, grounded in the document.
    async fn assist_note(
        &self,
        selected_text: &str,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError>;

    /// Remove the document's blob and namespace.
    async fn delete_document(&self, file_key: &str) -> DeletionReport;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns long-lived handles to every backend so the HTTP surface and the CLI share them.
///
/// Construct once near process start and share it through an `Arc`.
pub struct DocChatService {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatClient>,
    pipeline: IngestPipeline,
    retriever: ContextRetriever,
    metrics: Arc<IngestMetrics>,
}

impl DocChatService {
    /// Build every backend described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        tracing::info!(
            storage = ?config.storage_backend,
            vector = ?config.vector_backend,
            provider = ?config.embedding_provider,
            "Initializing document service"
        );
        let store = build_object_store(config).await?;
        let embedder = build_embedding_client(config)?;
        let index = build_vector_index(config)?;
        let chat: Arc<dyn ChatClient> = Arc::new(OpenAiChatClient::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            &config.chat_model,
            config.http_timeout(),
        )?);
        let segmenter = Segmenter::new(SegmenterConfig::from_config(config))?;
        tracing::debug!("Document service ready");

        Ok(Self::new(
            store,
            Arc::new(LopdfExtractor),
            Arc::new(segmenter),
            embedder,
            index,
            chat,
            ServiceSettings::from_config(config),
        ))
    }

    /// Assemble the service from explicit components.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn PdfExtractor>,
        segmenter: Arc<Segmenter>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatClient>,
        settings: ServiceSettings,
    ) -> Self {
        let pipeline = IngestPipeline::new(
            store.clone(),
            extractor,
            segmenter,
            embedder.clone(),
            index.clone(),
            settings.ingest,
        );
        let retriever = ContextRetriever::new(embedder, index.clone(), settings.context);
        Self {
            store,
            index,
            chat,
            pipeline,
            retriever,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    async fn lookup_context(
        &self,
        query: &str,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        self.metrics.record_context_query();
        Ok(self.retriever.get_context(query, file_key, cancel).await?)
    }
}

#[async_trait]
impl DocChatApi for DocChatService {
    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadReceipt, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidRequest("upload body is empty".into()));
        }
        let size = bytes.len();
        let document = self.store.upload(bytes, file_name, None).await?;
        tracing::info!(file_key = %document.file_key, bytes = size, "Document uploaded");
        let url = self.store.url_for(&document.file_key);
        Ok(UploadReceipt { document, url })
    }

    async fn ingest_document(
        &self,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, ServiceError> {
        let report = self.pipeline.run(file_key, cancel).await?;
        self.metrics.record_document(
            report.upsert.upserted_records as u64,
            report.upsert.failed_batches as u64,
            report.chunk_count == 0,
        );
        Ok(report)
    }

    async fn context_for(
        &self,
        query: &str,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        self.lookup_context(query, file_key, cancel).await
    }

    async fn chat_stream(
        &self,
        file_key: &str,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ServiceError> {
        let question = last_user_message(&messages)
            .ok_or_else(|| ServiceError::InvalidRequest("conversation has no user message".into()))?;
        let context = self.lookup_context(question, file_key, &cancel).await?;
        tracing::debug!(
            file_key,
            turns = messages.len(),
            context_chars = context.chars().count(),
            "Streaming chat answer"
        );
        let prompt = chat_messages(&context, &messages);
        Ok(self.chat.stream(&prompt, CHAT_TEMPERATURE, cancel).await?)
    }

    async fn assist_note(
        &self,
        selected_text: &str,
        file_key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        if selected_text.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("selected text is empty".into()));
        }
        let context = self.lookup_context(selected_text, file_key, cancel).await?;
        let prompt = build_note_prompt(&context, selected_text);
        Ok(self.chat.complete(&[prompt], NOTE_TEMPERATURE, cancel).await?)
    }

    async fn delete_document(&self, file_key: &str) -> DeletionReport {
        let namespace = self.pipeline.namespace_for(file_key);
        let (blob, namespace_result) = tokio::join!(
            self.store.delete(file_key),
            self.index.delete_namespace(&namespace)
        );

        let namespace_error = namespace_result.err().map(|source| NamespaceDeleteError {
            namespace: namespace.clone(),
            source,
        });
        if let Some(error) = &blob.error {
            tracing::warn!(file_key, error = %error, "Blob deletion failed");
        }
        if let Some(error) = &namespace_error {
            tracing::warn!(file_key, namespace = %namespace, error = %error, "Namespace deletion failed");
        }

        let first_error = blob
            .error
            .clone()
            .or_else(|| namespace_error.as_ref().map(ToString::to_string));
        DeletionReport {
            namespace_deleted: namespace_error.is_none(),
            blob,
            first_error,
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
