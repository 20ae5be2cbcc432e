use super::{EventLog, MessageRecord, MessageStore, NewMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

const MESSAGE_COLUMNS: &str =
    "id, session_id, msgid, question, answer, token, created_at, deleted_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                msgid      TEXT NOT NULL,
                question   TEXT NOT NULL,
                answer     TEXT NOT NULL,
                token      INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_messages_session_created
             ON messages(session_id, created_at);
             CREATE INDEX IF NOT EXISTS idx_messages_msgid
             ON messages(msgid);
             CREATE TABLE IF NOT EXISTS events (
                event_id   TEXT PRIMARY KEY,
                message    TEXT NOT NULL,
                created_at INTEGER NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        msgid: row.get(2)?,
        question: row.get(3)?,
        answer: row.get(4)?,
        token: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        deleted_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: NewMessage) -> Result<MessageRecord> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let created_at = Utc::now();
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO messages(session_id, msgid, question, answer, token, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.session_id,
                    message.msgid,
                    message.question,
                    message.answer,
                    message.token,
                    created_at.timestamp_millis(),
                ],
            )?;
            Ok(MessageRecord {
                id: conn.last_insert_rowid(),
                session_id: message.session_id,
                msgid: message.msgid,
                question: message.question,
                answer: message.answer,
                token: message.token,
                created_at,
                deleted_at: None,
            })
        })
        .await?
    }

    async fn recent_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        let since_ms = since.timestamp_millis();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND deleted_at IS NULL AND created_at > ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![session_id, since_ms, limit as i64], row_to_record)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await?
    }

    async fn latest_by_msgid(&self, msgid: &str) -> Result<Option<MessageRecord>> {
        let conn = self.conn.clone();
        let msgid = msgid.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE msgid = ?1
                         ORDER BY created_at DESC, id DESC
                         LIMIT 1"
                    ),
                    params![msgid],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await?
    }

    async fn clear_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();
        let at_ms = at.timestamp_millis();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let updated = conn.execute(
                "UPDATE messages SET deleted_at = ?2
                 WHERE session_id = ?1 AND deleted_at IS NULL",
                params![session_id, at_ms],
            )?;
            Ok(updated)
        })
        .await?
    }
}

#[async_trait]
impl EventLog for SqliteStore {
    async fn record_if_new(&self, event_id: &str, payload: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let event_id = event_id.to_string();
        let payload = payload.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            // INSERT OR IGNORE keeps check-and-record atomic under
            // concurrent first deliveries of the same id.
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO events(event_id, message, created_at)
                 VALUES(?1, ?2, ?3)",
                params![event_id, payload, Utc::now().timestamp_millis()],
            )?;
            Ok(inserted == 1)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(session_id: &str, msgid: &str, question: &str, answer: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            msgid: msgid.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            token: (question.chars().count() + answer.chars().count()) as i64,
        }
    }

    fn an_hour_ago() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn recent_returns_newest_first_and_skips_deleted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteStore::open(&dir.path().join("bridge.db"))?;

        store.insert(turn("u1", "m1", "q1", "a1")).await?;
        store.insert(turn("u1", "m2", "q2", "a2")).await?;
        store.insert(turn("u2", "m3", "q3", "a3")).await?;

        let recent = store.recent_for_session("u1", an_hour_ago(), 50).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].msgid, "m2");
        assert_eq!(recent[1].msgid, "m1");

        let cleared = store.clear_session("u1", Utc::now()).await?;
        assert_eq!(cleared, 2);
        assert!(store
            .recent_for_session("u1", an_hour_ago(), 50)
            .await?
            .is_empty());
        // The other session is untouched.
        assert_eq!(
            store.recent_for_session("u2", an_hour_ago(), 50).await?.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn clear_leaves_already_deleted_rows_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteStore::open(&dir.path().join("bridge.db"))?;

        store.insert(turn("u1", "m1", "q1", "a1")).await?;
        assert_eq!(store.clear_session("u1", Utc::now()).await?, 1);
        assert_eq!(store.clear_session("u1", Utc::now()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn latest_by_msgid_prefers_newest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteStore::open(&dir.path().join("bridge.db"))?;

        store.insert(turn("u1", "m1", "q", "first")).await?;
        store.insert(turn("u1", "m1", "q", "second")).await?;

        let found = store.latest_by_msgid("m1").await?.unwrap();
        assert_eq!(found.answer, "second");
        assert!(store.latest_by_msgid("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn record_if_new_is_first_sighting_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteStore::open(&dir.path().join("bridge.db"))?;

        assert!(store.record_if_new("e1", "<xml/>").await?);
        assert!(!store.record_if_new("e1", "<xml/>").await?);
        assert!(store.record_if_new("e2", "<xml/>").await?);
        Ok(())
    }

    #[tokio::test]
    async fn data_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("bridge.db");

        {
            let store = SqliteStore::open(&db_path)?;
            store.insert(turn("u1", "m1", "q1", "a1")).await?;
            assert!(store.record_if_new("e1", "<xml/>").await?);
        }

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(
            store.recent_for_session("u1", an_hour_ago(), 50).await?.len(),
            1
        );
        assert!(!store.record_if_new("e1", "<xml/>").await?);
        Ok(())
    }
}
