use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One persisted question/answer turn. Immutable after insert except for the
/// single unset-to-set transition of `deleted_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub msgid: String,
    pub question: String,
    pub answer: String,
    pub token: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: String,
    pub msgid: String,
    pub question: String,
    pub answer: String,
    pub token: i64,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a completed turn. The store assigns `created_at`.
    async fn insert(&self, message: NewMessage) -> Result<MessageRecord>;

    /// Non-deleted records of a session created after `since`, newest first,
    /// capped at `limit`.
    async fn recent_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// The most recently created record carrying this upstream message id.
    async fn latest_by_msgid(&self, msgid: &str) -> Result<Option<MessageRecord>>;

    /// Soft-deletes every non-deleted record of the session. Returns the
    /// number of records marked.
    async fn clear_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Records the event id if it was never seen, atomically. True exactly
    /// when this call is the first sighting.
    async fn record_if_new(&self, event_id: &str, payload: &str) -> Result<bool>;
}
