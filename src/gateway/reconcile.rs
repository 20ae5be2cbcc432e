use crate::storage::{EventLog, MessageRecord, MessageStore};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// How long a redelivered event waits for the original delivery's answer to
/// land before giving up and reprocessing.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}

/// Detects transport redeliveries and converges them onto the answer the
/// first delivery persisted, instead of paying for a second completion.
pub struct Reconciler {
    events: Arc<dyn EventLog>,
    messages: Arc<dyn MessageStore>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        events: Arc<dyn EventLog>,
        messages: Arc<dyn MessageStore>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            events,
            messages,
            policy,
        }
    }

    /// Records a first sighting as a side effect; true means this event id
    /// was delivered before.
    pub async fn is_duplicate(&self, event_id: &str, payload: &str) -> Result<bool> {
        Ok(!self.events.record_if_new(event_id, payload).await?)
    }

    /// Bounded poll for the stored answer matching this message id. None when
    /// every attempt comes up empty, typically because the original request
    /// is still in flight.
    pub async fn await_existing_answer(&self, msgid: &str) -> Result<Option<MessageRecord>> {
        for attempt in 0..self.policy.attempts {
            if let Some(record) = self.messages.latest_by_msgid(msgid).await? {
                tracing::debug!(msgid, attempt, "redelivery resolved from stored answer");
                return Ok(Some(record));
            }
            tokio::time::sleep(self.policy.delay).await;
        }
        Ok(None)
    }
}
