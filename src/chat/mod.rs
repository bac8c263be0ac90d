//! Chat prompting and completion.

mod openai;
mod prompt;

pub use openai::OpenAiChatClient;
pub use prompt::{
    CHAT_TEMPERATURE, NOTE_TEMPERATURE, build_chat_prompt, build_note_prompt, chat_messages,
    last_user_message,
};

use async_trait::async_trait;
use futures_core::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// End user.
    User,
    /// Model reply.
    Assistant,
    /// Instructions.
    System,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Text of the turn.
    pub content: String,
}

impl ChatMessage {
    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// System turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Errors raised by chat completion backends.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Provider answered with a non-success status.
    #[error("Chat API error ({status}): {message}")]
    Api {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Message extracted from the error body.
        message: String,
    },
    /// HTTP layer failed.
    #[error("Chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Response or stream event could not be interpreted.
    #[error("Malformed chat response: {0}")]
    InvalidResponse(String),
    /// The caller abandoned the request.
    #[error("Chat request cancelled")]
    Cancelled,
}

/// Stream of completion text fragments.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Chat completion backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Full completion for `messages`.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError>;

    /// Completion delivered as text fragments while it is generated.
    ///
    /// The stream ends early with [`ChatError::Cancelled`] once `cancel` fires.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError>;
}
