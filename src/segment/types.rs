//! Page and chunk types shared by extraction, segmentation, and indexing.

use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Plain text extracted from one PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    /// Extracted text, possibly empty.
    pub text: String,
}

/// Metadata stored with every vector record.
///
/// Serialized with the camelCase keys of the vector record format (`text`, `pageNumber`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Normalized page text, capped in bytes. This is what retrieval hands to the model.
    pub text: String,
    /// Page the chunk came from.
    pub page_number: u32,
}

/// Splitter output: the embedded text plus the page metadata it inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text that is embedded and hashed into the record id.
    pub content: String,
    /// Page provenance and stored text.
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Content-addressed identifier of the record built from this chunk.
    pub fn record_id(&self) -> String {
        crate::vector::compute_record_id(&self.content)
    }
}

/// Errors produced while turning page text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Configuration requested an impossible chunk size.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}
