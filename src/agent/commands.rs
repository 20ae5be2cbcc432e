use crate::storage::MessageStore;
use anyhow::Result;
use chrono::Utc;

const CLEAR_COMMAND: &str = "/clear";

pub const CLEAR_MESSAGE: &str = "✅ 记忆已清除";

pub const HELP_MESSAGE: &str = "ChatGPT 指令使用指南

Usage:
    /clear    清除上下文
    /help     获取更多帮助
  ";

/// Handles a slash-prefixed control message. `/clear` wipes the session's
/// live history; everything else, `/help` included, gets the usage text.
/// Never reaches the completion API.
pub async fn process(
    messages: &dyn MessageStore,
    session_id: &str,
    question: &str,
) -> Result<String> {
    if question == CLEAR_COMMAND {
        let cleared = messages.clear_session(session_id, Utc::now()).await?;
        tracing::info!(session_id, cleared, "conversation history cleared");
        return Ok(CLEAR_MESSAGE.to_string());
    }
    Ok(HELP_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, NewMessage};

    fn turn(session_id: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            msgid: "m1".to_string(),
            question: "q".to_string(),
            answer: "a".to_string(),
            token: 2,
        }
    }

    #[tokio::test]
    async fn clear_soft_deletes_and_confirms() -> Result<()> {
        let store = MemoryStore::new();
        store.insert(turn("u1")).await?;

        let reply = process(&store, "u1", "/clear").await?;
        assert_eq!(reply, CLEAR_MESSAGE);

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert!(store.recent_for_session("u1", hour_ago, 50).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_commands_fall_back_to_help() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(process(&store, "u1", "/bogus").await?, HELP_MESSAGE);
        assert_eq!(process(&store, "u1", "/help").await?, HELP_MESSAGE);
        Ok(())
    }
}
