//! Size-bounded recursive splitting and token budgets.
//!
//! - Splitting: `semchunk` breaks text at the most natural separator available (line breaks,
//!   whitespace runs, sentence punctuation) so that every piece fits the configured size. Size is
//!   measured in characters, matching the splitter defaults the pipeline has always used.
//! - Overlap: the tail of the previous piece is prepended to the next one so that sentences cut
//!   at a boundary stay visible to retrieval. Overlapped pieces are trimmed from the front to stay
//!   within budget.
//! - Token guard: pieces are clipped to the embedding model's input window, counted with
//!   `tiktoken-rs` when the model's encoding is known and with whitespace otherwise.

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    r50k_base,
};

use super::types::ChunkingError;

pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Look up the embedding context window for a given provider/model combination.
pub(crate) fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama => ollama_embedding_context_window(model),
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8191;
    }

    let size = get_context_size(model);
    if size == 4096 && model.contains("embedding") {
        tracing::debug!(model, "Using default embedding context window fallback");
    }
    size
}

fn ollama_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default Ollama context window estimate");
            4096
        }
    }
}

/// Build a token counter for the given provider/model.
///
/// OpenAI models must resolve to a known encoding. Ollama models often alias tokenizers that
/// `tiktoken` does not ship, so they fall back to whitespace counting with a warning.
pub(crate) fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; falling back to whitespace counter"
                );
                Ok(whitespace_counter())
            }
        },
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let model = model.trim();
    let encoding = resolve_encoding(model).map_err(|source| ChunkingError::Tokenizer {
        model: model.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);
    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

/// Encoding for a model name, or for a bare encoding name; unknown names use `cl100k_base`,
/// the encoding of every OpenAI embedding model.
fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Ok(encoding);
    }
    match model {
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "r50k_base" | "gpt2" => r50k_base(),
        "" | "cl100k_base" => cl100k_base(),
        other => {
            tracing::warn!(model = other, "Unknown tokenizer; counting with 'cl100k_base'");
            cl100k_base()
        }
    }
}

pub(crate) fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

pub(crate) fn char_counter() -> TokenCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

/// Split `text` into pieces of at most `chunk_size` characters with a character overlap.
///
/// Returns an empty vector when the input is all whitespace.
pub(crate) fn split_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_with_counter(text, chunk_size, overlap, char_counter()))
}

fn split_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker
        .chunk(text)
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .collect();
    apply_overlap(base_chunks, chunk_size, overlap, &counter)
}

/// Keep the longest prefix of `text` whose token count fits `budget`.
pub(crate) fn clip_to_token_budget(text: &str, budget: usize, counter: &TokenCounter) -> String {
    if counter.as_ref()(text) <= budget {
        return text.to_string();
    }

    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .collect();

    // Largest boundary whose prefix fits; token counts grow monotonically with the prefix.
    let (mut low, mut high) = (0usize, boundaries.len() - 1);
    while low < high {
        let mid = (low + high).div_ceil(2);
        if counter.as_ref()(&text[..boundaries[mid]]) <= budget {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    text[..boundaries[low]].trim_end().to_string()
}

fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if chunks.len() < 2 || effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let next = match previous.as_deref() {
            Some(prior) => {
                build_overlapped_chunk(prior, &current, effective_overlap, chunk_size, counter)
            }
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    counter: &TokenCounter,
) -> String {
    let tail = suffix_within(previous, overlap, counter);
    let joiner = if tail.is_empty()
        || tail.ends_with(char::is_whitespace)
        || current.starts_with(char::is_whitespace)
    {
        ""
    } else {
        " "
    };
    let combined = format!("{tail}{joiner}{current}");
    suffix_within(&combined, chunk_size, counter).to_string()
}

/// Longest whitespace-trimmed suffix of `text` whose count fits `limit`.
fn suffix_within<'a>(text: &'a str, limit: usize, counter: &TokenCounter) -> &'a str {
    if limit == 0 {
        return "";
    }
    text.char_indices()
        .map(|(start, _)| text[start..].trim_start())
        .find(|candidate| counter.as_ref()(candidate) <= limit)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_character_budget() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let pieces = split_text(&text, 50, 0).expect("split");
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 50, "piece too long: {piece:?}");
        }
        let words: Vec<&str> = pieces.iter().flat_map(|p| p.split_whitespace()).collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(words, original);
    }

    #[test]
    fn split_handles_blank_input() {
        assert!(split_text("   ", 10, 2).expect("split").is_empty());
        assert!(matches!(
            split_text("text", 0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
    }

    #[test]
    fn overlap_carries_previous_tail() {
        let text = "one two three four five";
        let pieces = split_with_counter(text, 3, 1, whitespace_counter());
        assert_eq!(pieces, vec!["one two three", "three four five"]);
    }

    #[test]
    fn overlapped_pieces_stay_within_budget() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let pieces = split_text(text, 20, 8).expect("split");
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 20, "piece too long: {piece:?}");
        }
    }

    #[test]
    fn clip_keeps_longest_fitting_prefix() {
        let counter = whitespace_counter();
        assert_eq!(clip_to_token_budget("a b c d e", 3, &counter), "a b c");
        assert_eq!(clip_to_token_budget("a b", 3, &counter), "a b");
    }

    #[test]
    fn clip_respects_tiktoken_budget() {
        let counter = build_token_counter(EmbeddingProvider::OpenAI, "text-embedding-ada-002")
            .expect("tokenizer");
        let text = "Retrieval augmented generation grounds answers in documents. ".repeat(10);
        let clipped = clip_to_token_budget(&text, 12, &counter);
        assert!(counter.as_ref()(&clipped) <= 12);
        assert!(text.starts_with(&clipped));
    }

    #[test]
    fn context_windows_for_known_models() {
        assert_eq!(
            embedding_context_window(EmbeddingProvider::OpenAI, "text-embedding-ada-002"),
            8191
        );
        assert_eq!(
            embedding_context_window(EmbeddingProvider::Ollama, "all-minilm-l6-v2"),
            512
        );
        assert_eq!(
            embedding_context_window(EmbeddingProvider::Ollama, "custom-model"),
            4096
        );
    }
}
