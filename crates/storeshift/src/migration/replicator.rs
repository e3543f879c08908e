//! Applies queued shadow writes to the key-value store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};

use storeshift_core::migration::{retry_delay, Mutation, QueuedWrite, ShadowWrite};
use storeshift_core::model::{DomainRecord, EntityKey, Timestamp};
use storeshift_core::storage::{
    delete_record, fetch_record, RecordReplay, RepositoryError, Result, Store,
};

use super::queue::{QueueResult, ShadowQueue};

#[derive(Debug, Clone)]
pub struct ReplicatorSettings {
    /// Entries read from the queue per drain.
    pub batch_size: usize,
    /// Bound on one shadow store call.
    pub shadow_timeout: Duration,
    /// Backoff after the first failure, doubled per further failure.
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Drain interval when nothing wakes the loop.
    pub idle_interval: Duration,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            shadow_timeout: Duration::from_secs(5),
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(300),
            idle_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub applied: usize,
    /// Acknowledged without writing because the key-value store already held
    /// a later version of the record.
    pub superseded: usize,
    pub failed: usize,
    /// Entries skipped because they are not due yet or an earlier entry for
    /// the same key has not been applied.
    pub deferred: usize,
}

impl BackfillReport {
    /// Entries this drain tried to apply.
    pub fn attempted(&self) -> usize {
        self.applied + self.superseded + self.failed
    }

    /// Entries this drain removed from the queue.
    pub fn acknowledged(&self) -> usize {
        self.applied + self.superseded
    }

    pub fn total(&self) -> usize {
        self.attempted() + self.deferred
    }
}

/// What replaying one write did to the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replayed {
    Written,
    /// The stored copy was later than the write and was kept.
    Superseded,
}

/// Single consumer of the shadow queue.
///
/// Entries are applied in `seq` order. Once an entry for a key fails or is
/// deferred, later entries for that key wait for the next drain, while
/// entries for other keys further down the queue still go through.
pub struct ShadowReplicator {
    queue: Arc<dyn ShadowQueue>,
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    notify: Arc<Notify>,
    settings: ReplicatorSettings,
}

impl ShadowReplicator {
    /// `source` is re-read for refresh entries, `target` receives the writes.
    pub fn new(
        queue: Arc<dyn ShadowQueue>,
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        notify: Arc<Notify>,
        settings: ReplicatorSettings,
    ) -> Self {
        Self {
            queue,
            source,
            target,
            notify,
            settings,
        }
    }

    /// Attempts up to `batch_size` queued writes.
    ///
    /// Pages through the queue past entries that are deferred, so a backlog
    /// of blocked keys at the head does not starve the rest.
    pub async fn drain_once(&self) -> QueueResult<BackfillReport> {
        let now = Timestamp::now();
        let batch_size = self.settings.batch_size.max(1);
        let mut blocked: HashSet<EntityKey> = HashSet::new();
        let mut report = BackfillReport::default();
        let mut cursor = 0;

        while report.attempted() < batch_size {
            let page = self.queue.pending_after(cursor, batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.seq;

            for entry in page {
                if report.attempted() >= batch_size {
                    break;
                }
                let key = entry.write.key;
                if blocked.contains(&key) || !entry.is_due(now) {
                    blocked.insert(key);
                    report.deferred += 1;
                    continue;
                }

                match self.apply_with_timeout(&entry.write).await {
                    Ok(replayed) => {
                        self.queue.ack(entry.seq).await?;
                        match replayed {
                            Replayed::Written => report.applied += 1,
                            Replayed::Superseded => report.superseded += 1,
                        }
                        tracing::debug!(
                            seq = entry.seq,
                            entity = %key,
                            operation = %entry.write.operation,
                            ?replayed,
                            "Applied shadow write"
                        );
                    }
                    Err(err) => {
                        self.record_failure(&entry, &err, now).await?;
                        blocked.insert(key);
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn apply_with_timeout(&self, write: &ShadowWrite) -> Result<Replayed> {
        match tokio::time::timeout(
            self.settings.shadow_timeout,
            apply(self.source.as_ref(), self.target.as_ref(), write),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::BackendUnavailable(format!(
                "key-value store did not answer within {} ms",
                self.settings.shadow_timeout.as_millis()
            ))),
        }
    }

    async fn record_failure(
        &self,
        entry: &QueuedWrite,
        err: &RepositoryError,
        now: Timestamp,
    ) -> QueueResult<()> {
        let attempts = entry.attempts + 1;
        let delay = retry_delay(attempts, self.settings.retry_base, self.settings.retry_max);
        let next_attempt_at = now + TimeDelta::milliseconds(delay.as_millis() as i64);

        if err.is_codec() {
            tracing::error!(
                seq = entry.seq,
                entity = %entry.write.key,
                operation = %entry.write.operation,
                attempts,
                error = %err,
                "Shadow write cannot be encoded"
            );
        } else {
            tracing::warn!(
                seq = entry.seq,
                entity = %entry.write.key,
                operation = %entry.write.operation,
                attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Shadow write failed"
            );
        }

        self.queue
            .record_failure(entry.seq, &err.to_string(), next_attempt_at)
            .await
    }

    /// Drains until shutdown, waking on new writes or every idle interval.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.settings.batch_size,
            "Shadow replicator started"
        );
        loop {
            match self.drain_once().await {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(
                        applied = report.applied,
                        superseded = report.superseded,
                        failed = report.failed,
                        deferred = report.deferred,
                        "Shadow queue drained"
                    );
                    if report.attempted() >= self.settings.batch_size {
                        continue;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "Failed to read shadow queue");
                }
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.settings.idle_interval) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Shadow replicator shutting down");
                    break;
                }
            }
        }
    }
}

/// Replays one write so that repeated or reordered deliveries converge.
///
/// Creates and updates become a version-guarded put, so an entry never
/// replaces a later copy of the record. Deletes of absent records succeed.
/// A refresh copies whatever `source` currently holds for the key.
pub async fn apply(
    source: &dyn Store,
    target: &dyn Store,
    write: &ShadowWrite,
) -> Result<Replayed> {
    match &write.mutation {
        Mutation::Create(record) | Mutation::Update(record) => put(target, record).await,
        Mutation::Delete => {
            delete_record(target, write.key).await?;
            Ok(Replayed::Written)
        }
        Mutation::Refresh => match fetch_record(source, write.key).await? {
            Some(record) => put(target, &record).await,
            None => match fetch_record(target, write.key).await? {
                Some(stored) if stored.updated_at() > write.submitted_at => {
                    Ok(Replayed::Superseded)
                }
                _ => {
                    delete_record(target, write.key).await?;
                    Ok(Replayed::Written)
                }
            },
        },
    }
}

async fn put(target: &dyn Store, record: &DomainRecord) -> Result<Replayed> {
    if target.put_record_unless_newer(record).await? {
        Ok(Replayed::Written)
    } else {
        Ok(Replayed::Superseded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::queue::InMemoryShadowQueue;
    use crate::storage::inmemory::InMemoryDocumentStore;
    use crate::storage::keyvalue::{InMemoryTable, KeyValueStore};
    use storeshift_core::migration::Operation;
    use storeshift_core::model::{Entity, User};
    use storeshift_core::storage::UserRepository;

    struct Harness {
        table: Arc<InMemoryTable>,
        document: InMemoryDocumentStore,
        key_value: KeyValueStore<InMemoryTable>,
        queue: InMemoryShadowQueue,
        replicator: ShadowReplicator,
    }

    fn harness_with(settings: ReplicatorSettings) -> Harness {
        let table = Arc::new(InMemoryTable::new());
        let document = InMemoryDocumentStore::new();
        let key_value = KeyValueStore::new(Arc::clone(&table));
        let queue = InMemoryShadowQueue::new();
        let replicator = ShadowReplicator::new(
            Arc::new(queue.clone()),
            Arc::new(document.clone()),
            Arc::new(key_value.clone()),
            Arc::new(Notify::new()),
            settings,
        );
        Harness {
            table,
            document,
            key_value,
            queue,
            replicator,
        }
    }

    fn harness() -> Harness {
        harness_with(ReplicatorSettings {
            retry_base: Duration::ZERO,
            ..ReplicatorSettings::default()
        })
    }

    fn create(user: &User) -> ShadowWrite {
        ShadowWrite::new(
            user.entity_key(),
            Operation::Create,
            Mutation::Create(user.clone().into_record()),
        )
    }

    fn update(user: &User) -> ShadowWrite {
        ShadowWrite::new(
            user.entity_key(),
            Operation::Update,
            Mutation::Update(user.clone().into_record()),
        )
    }

    fn refresh(user: &User) -> ShadowWrite {
        ShadowWrite::new(user.entity_key(), Operation::Update, Mutation::Refresh)
    }

    fn renamed(user: &User, name: &str, seconds_later: i64) -> User {
        let mut next = user.clone();
        next.name = name.to_string();
        next.updated_at = user.updated_at + TimeDelta::seconds(seconds_later);
        next
    }

    #[tokio::test]
    async fn test_drain_applies_in_order() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");

        h.queue.enqueue(create(&user)).await.unwrap();
        h.queue
            .enqueue(update(&renamed(&user, "Ana Maria", 1)))
            .await
            .unwrap();

        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.applied, 2);
        assert!(h.queue.is_empty().await.unwrap());
        let stored = h.key_value.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Ana Maria");
    }

    #[tokio::test]
    async fn test_offline_target_records_single_failure() {
        let h = harness();
        h.table.set_offline(true);
        let user = User::new("Ana", "a@x.com", "h1");
        h.queue.enqueue(create(&user)).await.unwrap();

        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.failed, 1);
        let failures = h.queue.failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].write.key, user.entity_key());
        assert_eq!(failures[0].write.operation, Operation::Create);
        assert_eq!(failures[0].attempts, 1);

        h.table.set_offline(false);
        let report = h.replicator.drain_once().await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(h.key_value.get_user(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_key_blocks_later_entries_for_same_key() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        let other = User::new("Bo", "b@x.com", "h1");

        // Update whose create was lost: converges by creating.
        h.queue.enqueue(update(&user)).await.unwrap();
        h.key_value.create_user(&other).await.unwrap();
        h.table.set_offline(true);
        h.queue
            .enqueue(ShadowWrite::new(
                other.entity_key(),
                Operation::Delete,
                Mutation::Delete,
            ))
            .await
            .unwrap();
        h.queue.enqueue(create(&other)).await.unwrap();

        let report = h.replicator.drain_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.deferred, 1);

        h.table.set_offline(false);
        let report = h.replicator.drain_once().await.unwrap();
        assert_eq!(report.applied, 3);
        assert!(h.key_value.get_user(user.id).await.unwrap().is_some());
        // Delete then create: the create wins because it was submitted last.
        assert!(h.key_value.get_user(other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        let (source, target): (&dyn Store, &dyn Store) = (&h.document, &h.key_value);

        assert_eq!(
            apply(source, target, &create(&user)).await.unwrap(),
            Replayed::Written
        );
        apply(source, target, &create(&user)).await.unwrap();

        let delete = ShadowWrite::new(user.entity_key(), Operation::Delete, Mutation::Delete);
        apply(source, target, &delete).await.unwrap();
        apply(source, target, &delete).await.unwrap();
        assert!(h.key_value.get_user(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backoff_defers_entry() {
        let h = harness_with(ReplicatorSettings {
            retry_base: Duration::from_secs(60),
            ..ReplicatorSettings::default()
        });
        h.table.set_offline(true);
        let user = User::new("Ana", "a@x.com", "h1");
        h.queue.enqueue(create(&user)).await.unwrap();

        assert_eq!(h.replicator.drain_once().await.unwrap().failed, 1);
        h.table.set_offline(false);

        let report = h.replicator.drain_once().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn test_backed_off_head_does_not_starve_later_keys() {
        let h = harness_with(ReplicatorSettings {
            batch_size: 2,
            retry_base: Duration::from_secs(60),
            ..ReplicatorSettings::default()
        });
        let ana = User::new("Ana", "a@x.com", "h1");
        let bo = User::new("Bo", "b@x.com", "h1");

        h.table.set_offline(true);
        h.queue.enqueue(create(&ana)).await.unwrap();
        h.queue
            .enqueue(update(&renamed(&ana, "Ana Maria", 1)))
            .await
            .unwrap();
        let report = h.replicator.drain_once().await.unwrap();
        assert_eq!((report.failed, report.deferred), (1, 1));

        h.table.set_offline(false);
        h.queue.enqueue(create(&bo)).await.unwrap();
        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(h.key_value.get_user(bo.id).await.unwrap(), Some(bo));
        assert_eq!(h.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_limit_counts_attempts_not_deferrals() {
        let h = harness_with(ReplicatorSettings {
            batch_size: 1,
            ..ReplicatorSettings::default()
        });
        let users: Vec<User> = (0..3)
            .map(|n| User::new("Ana", format!("a{n}@x.com"), "h1"))
            .collect();
        for user in &users {
            h.queue.enqueue(create(user)).await.unwrap();
        }

        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(h.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_older_update_does_not_overwrite_newer() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        h.key_value.create_user(&user).await.unwrap();
        let v1 = renamed(&user, "v1", 1);
        let v2 = renamed(&user, "v2", 2);

        h.queue.enqueue(update(&v2)).await.unwrap();
        h.queue.enqueue(update(&v1)).await.unwrap();
        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.superseded, 1);
        assert!(h.queue.is_empty().await.unwrap());
        assert_eq!(h.key_value.get_user(user.id).await.unwrap(), Some(v2));
    }

    #[tokio::test]
    async fn test_refresh_copies_current_document_state() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        h.key_value.create_user(&user).await.unwrap();
        let current = renamed(&user, "Ana Maria", 1);
        h.document.create_user(&current).await.unwrap();

        h.queue.enqueue(refresh(&user)).await.unwrap();
        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(h.key_value.get_user(user.id).await.unwrap(), Some(current));
    }

    #[tokio::test]
    async fn test_refresh_of_deleted_record_removes_it() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        h.key_value.create_user(&user).await.unwrap();

        h.queue.enqueue(refresh(&user)).await.unwrap();
        h.replicator.drain_once().await.unwrap();

        assert_eq!(h.key_value.get_user(user.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_waits_for_unreachable_document_store() {
        let h = harness();
        let user = User::new("Ana", "a@x.com", "h1");
        h.key_value.create_user(&user).await.unwrap();
        h.document.set_offline(true);

        h.queue.enqueue(refresh(&user)).await.unwrap();
        let report = h.replicator.drain_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(h.key_value.get_user(user.id).await.unwrap().is_some());
    }
}
