//! Page normalization and chunking.
//!
//! Every page is flattened to a single line, split into overlapping character windows, and
//! clipped to the embedding model's token window. Each chunk carries the page number and the
//! page text capped at [`METADATA_TEXT_LIMIT`] bytes.

mod splitter;
mod types;

pub use types::{Chunk, ChunkMetadata, ChunkingError, Page};

use crate::config::{Config, EmbeddingProvider};
use splitter::{TokenCounter, build_token_counter, clip_to_token_budget, split_text};

/// Byte cap for the text stored alongside each vector record.
pub const METADATA_TEXT_LIMIT: usize = 36_000;

/// Knobs controlling how pages are cut into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk.
    pub chunk_overlap: usize,
    /// Byte cap for the metadata text.
    pub metadata_text_limit: usize,
    /// Embedding provider whose tokenizer bounds each chunk.
    pub provider: EmbeddingProvider,
    /// Embedding model name used to resolve the tokenizer and its context window.
    pub model: String,
    /// Token budget per chunk. Defaults to the model's context window.
    pub token_budget: usize,
}

impl SegmenterConfig {
    /// Derive segmentation settings from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap,
            metadata_text_limit: METADATA_TEXT_LIMIT,
            provider: config.embedding_provider,
            model: config.embedding_model.clone(),
            token_budget: splitter::embedding_context_window(
                config.embedding_provider,
                &config.embedding_model,
            ),
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Turns pages into chunks ready for embedding.
pub struct Segmenter {
    config: SegmenterConfig,
    counter: TokenCounter,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Segmenter {
    /// Build a segmenter, loading the tokenizer for the configured model.
    pub fn new(config: SegmenterConfig) -> Result<Self, ChunkingError> {
        if config.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        let counter = build_token_counter(config.provider, &config.model)?;
        Ok(Self { config, counter })
    }

    /// Normalize and split one page.
    ///
    /// Line breaks are removed rather than replaced, so words straddling a break are joined.
    /// Blank pages produce no chunks.
    pub fn prepare(&self, page: &Page) -> Result<Vec<Chunk>, ChunkingError> {
        let normalized = normalize_page_text(&page.text);
        if normalized.trim().is_empty() {
            return Ok(Vec::new());
        }

        let metadata = ChunkMetadata {
            text: truncate_to_bytes(&normalized, self.config.metadata_text_limit).to_string(),
            page_number: page.number,
        };

        let pieces = split_text(
            &normalized,
            self.config.chunk_size,
            self.config.chunk_overlap,
        )?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .map(|piece| clip_to_token_budget(&piece, self.config.token_budget, &self.counter))
            .filter(|piece| !piece.trim().is_empty())
            .map(|content| Chunk {
                content,
                metadata: metadata.clone(),
            })
            .collect();

        tracing::debug!(
            page = page.number,
            chunks = chunks.len(),
            "Segmented page"
        );
        Ok(chunks)
    }
}

fn normalize_page_text(text: &str) -> String {
    text.chars().filter(|ch| *ch != '\n' && *ch != '\r').collect()
}

/// Longest prefix of `text` that is at most `limit` bytes and ends on a character boundary.
pub fn truncate_to_bytes(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
