use crate::embedding::{EmbeddingError, RetryExhausted};
use crate::extract::ExtractionError;
use crate::segment::{Chunk, ChunkingError};
use crate::storage::DownloadError;
use crate::vector::UpsertSummary;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stages an ingestion moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Fetching the blob into a temporary file.
    Downloading,
    /// Reading page text from the PDF.
    Extracting,
    /// Normalizing and chunking page text.
    Splitting,
    /// Embedding every chunk.
    Embedding,
    /// Writing vectors into the namespace.
    Upserting,
    /// Finished.
    Done,
}

impl IngestStage {
    /// Lowercase stage name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Splitting => "splitting",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal ingestion failure. Every variant knows the stage it happened in.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Blob could not be fetched.
    #[error("download failed: {0}")]
    Download(#[source] DownloadError),
    /// PDF could not be read.
    #[error("text extraction failed: {0}")]
    Extraction(#[source] ExtractionError),
    /// The blocking extraction task panicked or was aborted.
    #[error("text extraction task failed: {0}")]
    ExtractionTask(String),
    /// Chunking could not be performed.
    #[error("splitting failed: {0}")]
    Splitting(#[source] ChunkingError),
    /// A chunk could not be embedded within the retry policy.
    #[error("embedding failed: {0}")]
    Embedding(#[source] RetryExhausted),
    /// The caller abandoned the ingestion.
    #[error("ingestion cancelled while {stage}")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: IngestStage,
    },
}

impl IngestError {
    /// Stage in which the ingestion failed.
    pub fn stage(&self) -> IngestStage {
        match self {
            Self::Download(_) => IngestStage::Downloading,
            Self::Extraction(_) | Self::ExtractionTask(_) => IngestStage::Extracting,
            Self::Splitting(_) => IngestStage::Splitting,
            Self::Embedding(_) => IngestStage::Embedding,
            Self::Cancelled { stage } => *stage,
        }
    }
}

impl From<DownloadError> for IngestError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::Cancelled => Self::Cancelled {
                stage: IngestStage::Downloading,
            },
            other => Self::Download(other),
        }
    }
}

impl From<RetryExhausted> for IngestError {
    fn from(error: RetryExhausted) -> Self {
        match error.source {
            EmbeddingError::Cancelled => Self::Cancelled {
                stage: IngestStage::Embedding,
            },
            _ => Self::Embedding(error),
        }
    }
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    /// Storage key of the ingested blob.
    pub file_key: String,
    /// Namespace the vectors were written to.
    pub namespace: String,
    /// Pages found in the PDF.
    pub page_count: usize,
    /// Pages with no extractable text.
    pub empty_pages: usize,
    /// Unique chunks embedded.
    pub chunk_count: usize,
    /// Chunks dropped because an identical chunk already appeared in the document.
    pub skipped_duplicates: usize,
    /// Batch-level write outcome.
    pub upsert: UpsertSummary,
    /// Chunks of the first page.
    pub sample: Vec<Chunk>,
    /// Non-fatal conditions worth surfacing to the caller.
    pub warnings: Vec<String>,
}

impl IngestionReport {
    /// Whether any chunk failed to reach the index.
    pub fn is_partial(&self) -> bool {
        self.upsert.failed_batches > 0
    }
}
