use super::{EventLog, MessageRecord, MessageStore, NewMessage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory backend. Nothing survives a restart; useful for throwaway
/// deployments and as the fake the core logic is tested against.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<MessageRecord>,
    next_id: i64,
    events: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: NewMessage, created_at: DateTime<Utc>) -> MessageRecord {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let record = MessageRecord {
            id: inner.next_id,
            session_id: message.session_id,
            msgid: message.msgid,
            question: message.question,
            answer: message.answer,
            token: message.token,
            created_at,
            deleted_at: None,
        };
        inner.messages.push(record.clone());
        record
    }

    /// Test hook: stage a record with an explicit creation timestamp.
    #[cfg(test)]
    pub fn insert_at(&self, message: NewMessage, created_at: DateTime<Utc>) -> MessageRecord {
        self.push(message, created_at)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<MessageRecord> {
        Ok(self.push(message, Utc::now()))
    }

    async fn recent_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| {
                m.session_id == session_id && m.deleted_at.is_none() && m.created_at > since
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn latest_by_msgid(&self, msgid: &str) -> Result<Option<MessageRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.msgid == msgid)
            .max_by_key(|m| (m.created_at, m.id))
            .cloned())
    }

    async fn clear_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut cleared = 0;
        for record in inner
            .messages
            .iter_mut()
            .filter(|m| m.session_id == session_id && m.deleted_at.is_none())
        {
            record.deleted_at = Some(at);
            cleared += 1;
        }
        Ok(cleared)
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn record_if_new(&self, event_id: &str, payload: &str) -> Result<bool> {
        // One guard across check and insert; concurrent first deliveries
        // serialize here.
        let mut inner = self.inner.lock();
        if inner.events.contains_key(event_id) {
            return Ok(false);
        }
        inner
            .events
            .insert(event_id.to_string(), payload.to_string());
        Ok(true)
    }
}
