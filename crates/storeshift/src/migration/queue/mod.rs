//! Durable queue of shadow writes awaiting replication.
//!
//! The router appends an entry after every primary write in a dual-write
//! phase. The replicator consumes entries in `seq` order, acknowledging
//! successes and recording failures for backoff.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use storeshift_core::migration::{QueuedWrite, ShadowWrite};
use storeshift_core::model::{EntityKey, Timestamp};

pub use memory::InMemoryShadowQueue;
pub use sqlite::SqliteShadowQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Shadow queue storage error: {0}")]
    Storage(String),

    #[error("Shadow queue entry could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Storage for shadow writes.
#[async_trait]
pub trait ShadowQueue: Send + Sync {
    /// Appends a write and returns its sequence number.
    async fn enqueue(&self, write: ShadowWrite) -> QueueResult<u64>;

    /// Up to `limit` entries with a `seq` above `after`, in `seq` order, due or not.
    async fn pending_after(&self, after: u64, limit: usize) -> QueueResult<Vec<QueuedWrite>>;

    /// The oldest `limit` entries.
    async fn pending(&self, limit: usize) -> QueueResult<Vec<QueuedWrite>> {
        self.pending_after(0, limit).await
    }

    /// Removes an applied entry.
    async fn ack(&self, seq: u64) -> QueueResult<()>;

    /// Bumps the attempt counter and schedules the next attempt.
    async fn record_failure(
        &self,
        seq: u64,
        error: &str,
        next_attempt_at: Timestamp,
    ) -> QueueResult<()>;

    /// True if any entry for `key` is still queued.
    async fn has_pending(&self, key: &EntityKey) -> QueueResult<bool>;

    /// Entries that have failed at least once, in `seq` order.
    async fn failures(&self) -> QueueResult<Vec<QueuedWrite>>;

    async fn len(&self) -> QueueResult<u64>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}
