use super::{ChatClient, ChatError, ChatMessage, ChatStream};
use crate::embedding::{format_endpoint, read_error_message};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Chat client for `/v1/chat/completions` on OpenAI or a compatible server.
#[derive(Clone)]
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    idle_timeout: Duration,
}

impl OpenAiChatClient {
    /// Construct a client; `base_url` may or may not already end in `/v1`.
    ///
    /// `timeout` bounds connection setup and the gap between streamed events, not the length of
    /// a whole streamed answer.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = Client::builder()
            .user_agent("docchat/chat")
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key,
            model: model.to_string(),
            idle_timeout: timeout,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format_endpoint(base, "chat/completions")
        } else {
            format_endpoint(base, "v1/chat/completions")
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        stream: bool,
    ) -> Result<reqwest::Response, ChatError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature,
            stream,
        };
        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = read_error_message(&body);
            tracing::error!(%status, message = %message, model = %self.model, "Chat API returned an error");
            return Err(ChatError::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        let request = async {
            let response = self.send(messages, temperature, false).await?;
            let parsed: CompletionResponse = response.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    ChatError::InvalidResponse("missing choices[0].message.content".into())
                })
        };

        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            result = tokio::time::timeout(self.idle_timeout, request) => result,
        };
        answer.map_err(|_| ChatError::InvalidResponse("completion timed out".into()))?
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = self.send(messages, temperature, true) => response?,
        };

        let mut bytes = response.bytes_stream();
        let idle_timeout = self.idle_timeout;

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = std::str::from_utf8(&raw).map_err(|error| {
                        ChatError::InvalidResponse(format!("invalid UTF-8 in event stream: {error}"))
                    })?;
                    match parse_event_line(line)? {
                        SseEvent::Delta(text) => yield text,
                        SseEvent::Done => return,
                        SseEvent::Skip => {}
                    }
                }

                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ChatError::Cancelled),
                    chunk = tokio::time::timeout(idle_timeout, bytes.next()) => chunk
                        .map_err(|_| ChatError::InvalidResponse("event stream stalled".into())),
                }?;

                let Some(chunk) = next else { break };
                buffer.extend_from_slice(&chunk?);
            }
        };

        let stream: ChatStream = Box::pin(stream);
        Ok(stream)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Interpret one line of an OpenAI event stream.
fn parse_event_line(line: &str) -> Result<SseEvent, ChatError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let parsed: StreamChunk = serde_json::from_str(data)
        .map_err(|error| ChatError::InvalidResponse(format!("bad stream event: {error}")))?;
    let text: String = parsed
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    if text.is_empty() {
        Ok(SseEvent::Skip)
    } else {
        Ok(SseEvent::Delta(text))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}
