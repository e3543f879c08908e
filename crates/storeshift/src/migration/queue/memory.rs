use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use storeshift_core::migration::{QueuedWrite, ShadowWrite};
use storeshift_core::model::{EntityKey, Timestamp};

use super::{QueueError, QueueResult, ShadowQueue};

#[derive(Debug, Default)]
struct Entries {
    next_seq: u64,
    writes: BTreeMap<u64, QueuedWrite>,
}

/// Process-local shadow queue. Entries are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShadowQueue {
    entries: Arc<Mutex<Entries>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryShadowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Storage(
                "in-memory shadow queue is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ShadowQueue for InMemoryShadowQueue {
    async fn enqueue(&self, write: ShadowWrite) -> QueueResult<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        entries.next_seq += 1;
        let seq = entries.next_seq;
        let next_attempt_at = write.submitted_at;
        entries.writes.insert(
            seq,
            QueuedWrite {
                seq,
                write,
                attempts: 0,
                last_error: None,
                next_attempt_at,
            },
        );
        Ok(seq)
    }

    async fn pending_after(&self, after: u64, limit: usize) -> QueueResult<Vec<QueuedWrite>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries
            .writes
            .range(after.saturating_add(1)..)
            .map(|(_, entry)| entry.clone())
            .take(limit)
            .collect())
    }

    async fn ack(&self, seq: u64) -> QueueResult<()> {
        self.check()?;
        self.entries.lock().await.writes.remove(&seq);
        Ok(())
    }

    async fn record_failure(
        &self,
        seq: u64,
        error: &str,
        next_attempt_at: Timestamp,
    ) -> QueueResult<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.writes.get_mut(&seq) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }

    async fn has_pending(&self, key: &EntityKey) -> QueueResult<bool> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries.writes.values().any(|entry| entry.write.key == *key))
    }

    async fn failures(&self) -> QueueResult<Vec<QueuedWrite>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(entries
            .writes
            .values()
            .filter(|entry| entry.is_failure())
            .cloned()
            .collect())
    }

    async fn len(&self) -> QueueResult<u64> {
        self.check()?;
        Ok(self.entries.lock().await.writes.len() as u64)
    }
}
