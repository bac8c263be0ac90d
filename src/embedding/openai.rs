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

/// Embedding client for the OpenAI `/v1/embeddings` endpoint and compatible servers.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Construct a client; `base_url` may or may not already end in `/v1`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
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
            api_key,
            model: model.to_string(),
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format_endpoint(base, "embeddings")
        } else {
            format_endpoint(base, "v1/embeddings")
        }
    }

    async fn request(&self, input: String) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self.http.post(self.endpoint()).json(&json!({
            "model": self.model,
            "input": input,
        }));
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = read_error_message(&body);
            tracing::error!(%status, message = %message, model = %self.model, "Embedding API returned an error");
            return Err(EmbeddingError::Api { status, message });
        }

        let payload: EmbeddingResponse = response.json().await?;
        let vector = payload
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing data[0].embedding".into()))?;
        check_dimension(self.dimension, vector)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let input = prepare_input(text)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
            result = self.request(input) => result,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}
