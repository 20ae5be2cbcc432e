use crate::providers::{CompletionError, CompletionProvider};
use crate::storage::{MessageStore, NewMessage};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

pub mod commands;
pub mod history;

pub const RATE_LIMIT_REPLY: &str = "问题太多了，我有点眩晕，请稍后再试";
pub const COMPLETION_ERROR_REPLY: &str = "问题太难了 出错了. (uДu〃).";

/// Turns one inbound text message into a reply: commands are handled
/// locally, everything else goes through the prompt window and the
/// completion provider.
pub struct ChatAgent {
    messages: Arc<dyn MessageStore>,
    provider: Arc<dyn CompletionProvider>,
    max_token: i64,
}

impl ChatAgent {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        provider: Arc<dyn CompletionProvider>,
        max_token: i64,
    ) -> Self {
        Self {
            messages,
            provider,
            max_token,
        }
    }

    /// Soft-fails: completion problems come back as fixed user-facing
    /// strings and leave no record behind, so an upstream redelivery can
    /// retry the turn from scratch.
    pub async fn reply(&self, session_id: &str, msgid: &str, content: &str) -> Result<String> {
        let question = content.trim();
        if question.starts_with('/') {
            return commands::process(self.messages.as_ref(), session_id, question).await;
        }

        let now = Utc::now();
        let recent = self
            .messages
            .recent_for_session(
                session_id,
                history::lookback_horizon(now),
                history::MAX_HISTORY_MESSAGES,
            )
            .await?;
        let prompt = history::build_prompt(&recent, question, now, self.max_token);

        let answer = match self.provider.complete(&prompt).await {
            Ok(answer) => answer.replace("\n\n", ""),
            Err(CompletionError::RateLimited(detail)) => {
                tracing::error!(session_id, question, detail = %detail, "completion API rate limited");
                return Ok(RATE_LIMIT_REPLY.to_string());
            }
            Err(err) => {
                tracing::error!(session_id, question, error = %err, "completion request failed");
                return Ok(COMPLETION_ERROR_REPLY.to_string());
            }
        };
        tracing::debug!(session_id, question, answer = %answer, "completion succeeded");

        let token = (question.chars().count() + answer.chars().count()) as i64;
        self.messages
            .insert(NewMessage {
                session_id: session_id.to_string(),
                msgid: msgid.to_string(),
                question: question.to_string(),
                answer: answer.clone(),
                token,
            })
            .await?;

        Ok(answer)
    }
}
