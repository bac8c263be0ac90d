//! Embedding client abstraction and HTTP adapters.
//!
//! Every adapter validates and normalizes its input the same way (see [`prepare_input`]) and
//! races the outbound request against the caller's [`CancellationToken`]. Clients never retry on
//! their own; ingestion layers [`retry::embed_with_retry`] on top, the interactive query path
//! does not.

mod ollama;
mod openai;
pub mod retry;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;
pub use retry::{RetryExhausted, RetryPolicy, embed_with_retry};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Input was empty or contained only whitespace.
    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),
    /// Provider answered with a non-success status.
    #[error("Embedding API error ({status}): {message}")]
    Api {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Message extracted from the structured error body.
        message: String,
    },
    /// HTTP layer failed before a response was received.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider response could not be interpreted.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Returned vector length differs from the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the index.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
    /// The caller abandoned the request.
    #[error("Embedding request cancelled")]
    Cancelled,
}

impl EmbeddingError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Http(_) | Self::InvalidResponse(_) => true,
            Self::InvalidInput(_) | Self::DimensionMismatch { .. } | Self::Cancelled => false,
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Length of the vectors this client produces.
    fn dimension(&self) -> usize;

    /// Produce the embedding vector for a single piece of text.
    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError>;
}

/// Build an embedding client suitable for the current configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            &config.embedding_model,
            config.embedding_dimension,
            config.http_timeout(),
        )?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.http_timeout(),
        )?),
    };
    Ok(client)
}

/// Validate embedding input and strip newline characters.
///
/// Literal newlines degrade embedding quality for the hosted models, so they are removed rather
/// than replaced.
pub fn prepare_input(text: &str) -> Result<String, EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput(
            "text must contain at least one non-whitespace character".to_string(),
        ));
    }
    Ok(text.chars().filter(|c| *c != '\n' && *c != '\r').collect())
}

pub(crate) fn check_dimension(expected: usize, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Pull a human-readable message out of a provider error body.
///
/// Understands `{"error": {"message": ..}}` (OpenAI) and `{"error": ".."}` (Ollama); anything
/// else is returned verbatim.
pub(crate) fn read_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| value.pointer("/error").and_then(Value::as_str))
            .or_else(|| value.pointer("/message").and_then(Value::as_str))
    });
    match message {
        Some(message) => message.to_string(),
        None if body.trim().is_empty() => "empty error body".to_string(),
        None => body.trim().to_string(),
    }
}

pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
