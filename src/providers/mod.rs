use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod openai;

pub use openai::OpenAiClient;

/// One role-tagged entry of a chat-completion prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion API rate limited: {0}")]
    RateLimited(String),
    #[error("completion API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion response carried no message content")]
    EmptyResponse,
}

/// Outbound chat-completion call. The implementation owns the model name and
/// token budget; callers only supply the ordered prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}
