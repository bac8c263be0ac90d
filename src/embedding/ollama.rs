use super::{
    EmbeddingClient, EmbeddingError, check_dimension, format_endpoint, prepare_input,
    read_error_message,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Embedding client issuing requests directly to a local Ollama runtime.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Construct a client for the runtime listening at `base_url`.
    pub fn new(
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .user_agent("docchat/embeddings")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            model: model.to_string(),
            dimension,
        })
    }

    async fn request(&self, prompt: String) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .http
            .post(format_endpoint(&self.base_url, "api/embeddings"))
            .json(&json!({ "model": self.model, "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = read_error_message(&body);
            tracing::error!(%status, message = %message, model = %self.model, "Ollama embedding request failed");
            return Err(EmbeddingError::Api { status, message });
        }

        let payload: OllamaEmbeddingResponse = response.json().await?;
        if payload.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "Ollama returned an empty embedding".into(),
            ));
        }
        check_dimension(self.dimension, payload.embedding)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let prompt = prepare_input(text)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
            result = self.request(prompt) => result,
        }
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}
