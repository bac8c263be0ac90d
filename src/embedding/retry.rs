//! Bounded retry for embedding calls made during ingestion.

use super::{EmbeddingClient, EmbeddingError};
use crate::config::Config;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How many times an embedding is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: usize,
    /// Delay before attempt `n + 1`; the last entry repeats when attempts outnumber entries.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: [200, 500, 1000].into_iter().map(Duration::from_millis).collect(),
        }
    }
}

impl RetryPolicy {
    /// Policy described by `EMBEDDING_MAX_ATTEMPTS` and `EMBEDDING_BACKOFF_MS`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.embedding_max_attempts.max(1),
            backoff: config
                .embedding_backoff_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn delay_after(&self, failed_attempt: usize) -> Duration {
        let index = failed_attempt.saturating_sub(1);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Embedding failed on every permitted attempt, or hit a non-retryable error.
#[derive(Debug, Error)]
#[error("embedding failed after {attempts} attempt(s): {source}")]
pub struct RetryExhausted {
    /// Attempts actually made.
    pub attempts: usize,
    /// Error returned by the last attempt.
    #[source]
    pub source: EmbeddingError,
}

/// Embed `text`, retrying transient failures according to `policy`.
///
/// Invalid input, dimension mismatches, cancellation and client-side API errors are returned
/// after the first attempt.
pub async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    text: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, RetryExhausted> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match client.embed(text, cancel).await {
            Ok(vector) => return Ok(vector),
            Err(error) => error,
        };

        if attempt >= max_attempts || !error.is_retryable() {
            return Err(RetryExhausted {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %error, "Embedding attempt failed; retrying");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    source: EmbeddingError::Cancelled,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    struct ScriptedClient {
        script: Mutex<Vec<Result<Vec<f32>, EmbeddingError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(mut script: Vec<Result<Vec<f32>, EmbeddingError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedClient {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            _text: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<f32>, EmbeddingError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(vec![0.0, 0.0]))
        }
    }

    fn server_error() -> EmbeddingError {
        EmbeddingError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".into(),
        }
    }

    fn instant_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: vec![Duration::ZERO],
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let client = ScriptedClient::new(vec![
            Err(server_error()),
            Err(server_error()),
            Ok(vec![1.0, 2.0]),
        ]);

        let vector = embed_with_retry(&client, "text", &instant_policy(3), &CancellationToken::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = ScriptedClient::new(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
            Ok(vec![1.0, 2.0]),
        ]);

        let error = embed_with_retry(&client, "text", &instant_policy(3), &CancellationToken::new())
            .await
            .expect_err("exhausted");

        assert_eq!(error.attempts, 3);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_invalid_input() {
        let client = ScriptedClient::new(vec![Err(EmbeddingError::InvalidInput("empty".into()))]);

        let error = embed_with_retry(&client, "", &instant_policy(5), &CancellationToken::new())
            .await
            .expect_err("invalid input");

        assert_eq!(error.attempts, 1);
        assert!(matches!(error.source, EmbeddingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let client = ScriptedClient::new(vec![Err(server_error())]);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: vec![Duration::from_secs(30)],
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let error = embed_with_retry(&client, "text", &policy, &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(error.source, EmbeddingError::Cancelled));
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn delay_repeats_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(7), Duration::from_millis(1000));
    }
}
