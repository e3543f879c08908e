//! Phase-aware dispatch of repository calls.
//!
//! Every call copies the phase once and routes by the table in
//! [`MigrationPhase::dispatch`]. Writes in the dual-write phases run the
//! primary write under the key's lock, then append the shadow write to the
//! queue. The replicator applies it to the key-value store later, so a
//! failing shadow never reaches the caller.
//!
//! A write whose shadow cannot be derived is queued as a refresh, which makes
//! the replicator copy the primary's state. A key whose shadow cannot be
//! queued at all is remembered and refreshed once the queue accepts writes.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;

use storeshift_core::migration::{
    Access, Backend, MigrationPhase, Mutation, Operation, ReconciliationRecord, ShadowWrite,
};
use storeshift_core::model::{DomainRecord, Entity, EntityKey};
use storeshift_core::storage::{fetch_record, RepositoryError, Result, Store};

use super::controller::PhaseHandle;
use super::locks::KeyLocks;
use super::queue::ShadowQueue;
use crate::verify::{ReconciliationSink, TracingSink};

pub const DEFAULT_PRIMARY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SAMPLE_RATE: f64 = 0.05;

/// How the shadow write of a call is derived.
#[derive(Debug, Clone)]
pub enum ShadowPlan {
    /// Replay this mutation as is.
    Replay(Mutation),
    /// Re-read the record from the primary after the write and replay it as
    /// an update. Used for partial updates. Falls back to a refresh when the
    /// re-read fails.
    ReadBack,
}

/// Read results whose records can be sampled against the key-value store.
pub trait SampledRead {
    fn sampled_records(&self) -> Vec<DomainRecord>;
}

impl<E: Entity> SampledRead for Option<E> {
    fn sampled_records(&self) -> Vec<DomainRecord> {
        self.iter().cloned().map(Entity::into_record).collect()
    }
}

impl<E: Entity> SampledRead for Vec<E> {
    fn sampled_records(&self) -> Vec<DomainRecord> {
        self.iter().cloned().map(Entity::into_record).collect()
    }
}

impl SampledRead for u64 {
    fn sampled_records(&self) -> Vec<DomainRecord> {
        Vec::new()
    }
}

/// Routes repository calls to the document store, the key-value store or both.
pub struct MigrationRouter {
    document: Arc<dyn Store>,
    key_value: Arc<dyn Store>,
    phase: PhaseHandle,
    queue: Arc<dyn ShadowQueue>,
    locks: Arc<KeyLocks>,
    notify: Arc<Notify>,
    sink: Arc<dyn ReconciliationSink>,
    primary_timeout: Duration,
    sample_rate: f64,
    sampled: Mutex<JoinSet<()>>,
    unqueued: Mutex<BTreeSet<EntityKey>>,
}

impl MigrationRouter {
    pub fn new(
        document: Arc<dyn Store>,
        key_value: Arc<dyn Store>,
        phase: PhaseHandle,
        queue: Arc<dyn ShadowQueue>,
    ) -> Self {
        Self {
            document,
            key_value,
            phase,
            queue,
            locks: Arc::new(KeyLocks::new()),
            notify: Arc::new(Notify::new()),
            sink: Arc::new(TracingSink),
            primary_timeout: DEFAULT_PRIMARY_TIMEOUT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sampled: Mutex::new(JoinSet::new()),
            unqueued: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReconciliationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    /// Fraction of records read in `DUAL_WRITE_VERIFY` that are re-checked
    /// against the key-value store. Clamped to `[0, 1]`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase.current()
    }

    pub fn store(&self, backend: Backend) -> &Arc<dyn Store> {
        match backend {
            Backend::Document => &self.document,
            Backend::KeyValue => &self.key_value,
        }
    }

    pub fn queue(&self) -> &Arc<dyn ShadowQueue> {
        &self.queue
    }

    pub fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    /// Woken after every enqueued shadow write.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Runs a read against the primary store of the current phase.
    pub async fn read<T, F, Fut>(&self, f: F) -> Result<T>
    where
        T: SampledRead,
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dispatch = self.phase.current().dispatch(Access::Read);
        let result = self.call_primary(dispatch.primary, f).await?;

        if dispatch.verify_reads && self.sample_rate > 0.0 {
            for record in result.sampled_records() {
                if rand::random::<f64>() < self.sample_rate {
                    self.spawn_sampled_check(record.key()).await;
                }
            }
        }
        Ok(result)
    }

    async fn call_primary<T, F, Fut>(&self, backend: Backend, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = Arc::clone(self.store(backend));
        match tokio::time::timeout(self.primary_timeout, f(store)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    backend = %backend,
                    timeout_ms = self.primary_timeout.as_millis() as u64,
                    "Primary store call timed out"
                );
                Err(RepositoryError::BackendUnavailable(format!(
                    "{backend} store did not answer within {} ms",
                    self.primary_timeout.as_millis()
                )))
            }
        }
    }

    async fn spawn_sampled_check(&self, key: EntityKey) {
        let check = SampledCheck {
            document: Arc::clone(&self.document),
            key_value: Arc::clone(&self.key_value),
            queue: Arc::clone(&self.queue),
            locks: Arc::clone(&self.locks),
            sink: Arc::clone(&self.sink),
            timeout: self.primary_timeout,
        };
        let mut sampled = self.sampled.lock().await;
        while sampled.try_join_next().is_some() {}
        sampled.spawn(check.run(key));
    }

    /// Waits for every sampled check spawned so far.
    pub async fn wait_for_sampled_reads(&self) {
        let mut sampled = self.sampled.lock().await;
        while sampled.join_next().await.is_some() {}
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Runs a write against the primary store and, in the dual-write phases,
    /// queues its shadow write.
    ///
    /// The caller sees only the primary result. A shadow write the queue
    /// rejects is logged with its payload and its key is kept for
    /// [`requeue_unqueued`](Self::requeue_unqueued).
    pub async fn write<T, F, Fut>(
        &self,
        key: EntityKey,
        operation: Operation,
        plan: ShadowPlan,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dispatch = self.phase.current().dispatch(Access::Write);
        if dispatch.shadow.is_none() {
            return self.call_primary(dispatch.primary, f).await;
        }

        let guard = self.locks.lock(key).await;
        let result = self.call_primary(dispatch.primary, f).await?;

        let mutation = match plan {
            ShadowPlan::Replay(mutation) => mutation,
            ShadowPlan::ReadBack => self.read_back(dispatch.primary, key, operation).await,
        };
        let queued = self.enqueue(ShadowWrite::new(key, operation, mutation)).await;

        drop(guard);
        if queued {
            self.requeue_unqueued().await;
        }
        self.notify.notify_one();
        Ok(result)
    }

    async fn read_back(&self, backend: Backend, key: EntityKey, operation: Operation) -> Mutation {
        let store = Arc::clone(self.store(backend));
        let read = tokio::time::timeout(self.primary_timeout, async move {
            fetch_record(store.as_ref(), key).await
        })
        .await;

        match read {
            Ok(Ok(Some(record))) => Mutation::Update(record),
            Ok(Ok(None)) => Mutation::Delete,
            Ok(Err(err)) => {
                tracing::warn!(
                    entity = %key,
                    operation = %operation,
                    error = %err,
                    "Failed to re-read record for shadow write, queueing a refresh"
                );
                Mutation::Refresh
            }
            Err(_) => {
                tracing::warn!(
                    entity = %key,
                    operation = %operation,
                    "Timed out re-reading record for shadow write, queueing a refresh"
                );
                Mutation::Refresh
            }
        }
    }

    async fn enqueue(&self, write: ShadowWrite) -> bool {
        match self.queue.enqueue(write.clone()).await {
            Ok(seq) => {
                tracing::debug!(
                    seq,
                    entity = %write.key,
                    operation = %write.operation,
                    "Queued shadow write"
                );
                true
            }
            Err(err) => {
                let payload = serde_json::to_string(&write)
                    .unwrap_or_else(|e| format!("<unserializable: {e}>"));
                tracing::error!(
                    entity = %write.key,
                    operation = %write.operation,
                    error = %err,
                    payload = %payload,
                    "Failed to queue shadow write"
                );
                self.unqueued.lock().await.insert(write.key);
                false
            }
        }
    }

    /// Queues a refresh for every key whose shadow write the queue rejected.
    /// Returns the number of keys still waiting.
    pub async fn requeue_unqueued(&self) -> usize {
        let mut unqueued = self.unqueued.lock().await;
        while let Some(key) = unqueued.first().copied() {
            let refresh = ShadowWrite::new(key, Operation::Update, Mutation::Refresh);
            match self.queue.enqueue(refresh).await {
                Ok(seq) => {
                    tracing::info!(seq, entity = %key, "Queued refresh for unqueued shadow write");
                    unqueued.remove(&key);
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        waiting = unqueued.len(),
                        "Shadow queue still rejects writes"
                    );
                    break;
                }
            }
        }
        unqueued.len()
    }

    /// Keys whose shadow write is neither applied nor queued.
    pub async fn unqueued_keys(&self) -> Vec<EntityKey> {
        self.unqueued.lock().await.iter().copied().collect()
    }
}

/// Background comparison of one sampled record.
struct SampledCheck {
    document: Arc<dyn Store>,
    key_value: Arc<dyn Store>,
    queue: Arc<dyn ShadowQueue>,
    locks: Arc<KeyLocks>,
    sink: Arc<dyn ReconciliationSink>,
    timeout: Duration,
}

impl SampledCheck {
    async fn run(self, key: EntityKey) {
        // Holding the lock keeps new writes for the key out of the queue
        // while both sides are read.
        let _guard = self.locks.lock(key).await;

        match self.queue.has_pending(&key).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(entity = %key, "Skipping sampled check with queued shadow writes");
                return;
            }
            Err(err) => {
                tracing::warn!(entity = %key, error = %err, "Skipping sampled check");
                return;
            }
        }

        let reads = tokio::time::timeout(self.timeout, async {
            let document = fetch_record(self.document.as_ref(), key).await?;
            let key_value = fetch_record(self.key_value.as_ref(), key).await?;
            Ok::<_, RepositoryError>((document, key_value))
        })
        .await;

        let (document, key_value) = match reads {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                tracing::warn!(entity = %key, error = %err, "Sampled check read failed");
                return;
            }
            Err(_) => {
                tracing::warn!(entity = %key, "Sampled check timed out");
                return;
            }
        };

        let record = match ReconciliationRecord::compare(key, document.as_ref(), key_value.as_ref())
        {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(entity = %key, error = %err, "Failed to compare sampled record");
                return;
            }
        };

        if record.matched {
            tracing::trace!(entity = %key, "Sampled record matches");
            return;
        }
        if let Err(err) = self.sink.publish(&record).await {
            tracing::error!(entity = %key, error = %err, "Failed to publish reconciliation record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::controller::PhaseController;
    use crate::migration::queue::InMemoryShadowQueue;
    use crate::migration::replicator::{ReplicatorSettings, ShadowReplicator};
    use crate::storage::inmemory::InMemoryDocumentStore;
    use crate::storage::keyvalue::{InMemoryTable, KeyValueStore};
    use crate::verify::MemorySink;
    use storeshift_core::model::User;
    use storeshift_core::storage::UserRepository;

    struct Harness {
        document: InMemoryDocumentStore,
        table: Arc<InMemoryTable>,
        key_value: KeyValueStore<InMemoryTable>,
        queue: InMemoryShadowQueue,
        sink: MemorySink,
        controller: PhaseController,
        router: MigrationRouter,
    }

    fn harness(phase: MigrationPhase) -> Harness {
        let document = InMemoryDocumentStore::new();
        let table = Arc::new(InMemoryTable::new());
        let key_value = KeyValueStore::new(Arc::clone(&table));
        let queue = InMemoryShadowQueue::new();
        let sink = MemorySink::new();
        let controller = PhaseController::new(phase);
        let router = MigrationRouter::new(
            Arc::new(document.clone()),
            Arc::new(key_value.clone()),
            controller.handle(),
            Arc::new(queue.clone()),
        )
        .with_sink(Arc::new(sink.clone()));

        Harness {
            document,
            table,
            key_value,
            queue,
            sink,
            controller,
            router,
        }
    }

    async fn create(router: &MigrationRouter, user: &User) -> Result<()> {
        let record = user.clone().into_record();
        router
            .write(
                user.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(Mutation::Create(record)),
                |store| async move { store.create_user(user).await },
            )
            .await
    }

    #[tokio::test]
    async fn test_source_only_never_touches_key_value() {
        let h = harness(MigrationPhase::SourceOnly);
        let user = User::new("Ana", "a@x.com", "h1");

        create(&h.router, &user).await.unwrap();
        let found = h
            .router
            .read(|store| async move { store.get_user(user.id).await })
            .await
            .unwrap();

        assert_eq!(found, Some(user));
        assert_eq!(h.table.calls(), 0);
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dual_write_queues_shadow_after_primary() {
        let h = harness(MigrationPhase::DualWrite);
        let user = User::new("Ana", "a@x.com", "h1");

        create(&h.router, &user).await.unwrap();

        assert!(h.document.get_user(user.id).await.unwrap().is_some());
        let pending = h.queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].write.key, user.entity_key());
        assert_eq!(pending[0].write.operation, Operation::Create);
        assert_eq!(h.table.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_primary_queues_nothing() {
        let h = harness(MigrationPhase::DualWrite);
        let user = User::new("Ana", "a@x.com", "h1");
        create(&h.router, &user).await.unwrap();

        let again = create(&h.router, &user).await;

        assert!(matches!(again, Err(RepositoryError::DuplicateKey { .. })));
        assert_eq!(h.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_failure_does_not_fail_caller() {
        let h = harness(MigrationPhase::DualWrite);
        h.queue.set_unavailable(true);
        let user = User::new("Ana", "a@x.com", "h1");

        create(&h.router, &user).await.unwrap();

        assert!(h.document.get_user(user.id).await.unwrap().is_some());
        assert_eq!(h.router.unqueued_keys().await, vec![user.entity_key()]);
    }

    #[tokio::test]
    async fn test_unqueued_key_is_refreshed_after_queue_recovers() {
        let h = harness(MigrationPhase::DualWrite);
        let ana = User::new("Ana", "a@x.com", "h1");
        let bo = User::new("Bo", "b@x.com", "h1");

        h.queue.set_unavailable(true);
        create(&h.router, &ana).await.unwrap();
        h.queue.set_unavailable(false);
        create(&h.router, &bo).await.unwrap();

        assert!(h.router.unqueued_keys().await.is_empty());
        let pending = h.queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].write.key, ana.entity_key());
        assert_eq!(pending[1].write.mutation, Mutation::Refresh);

        let replicator = ShadowReplicator::new(
            Arc::new(h.queue.clone()),
            Arc::new(h.document.clone()),
            Arc::new(h.key_value.clone()),
            h.router.notifier(),
            ReplicatorSettings::default(),
        );
        assert_eq!(replicator.drain_once().await.unwrap().applied, 2);
        assert_eq!(h.key_value.get_user(ana.id).await.unwrap(), Some(ana));
        assert_eq!(h.key_value.get_user(bo.id).await.unwrap(), Some(bo));
    }

    #[tokio::test]
    async fn test_requeue_keeps_keys_while_queue_is_down() {
        let h = harness(MigrationPhase::DualWrite);
        h.queue.set_unavailable(true);
        let user = User::new("Ana", "a@x.com", "h1");
        create(&h.router, &user).await.unwrap();

        assert_eq!(h.router.requeue_unqueued().await, 1);
        h.queue.set_unavailable(false);
        assert_eq!(h.router.requeue_unqueued().await, 0);
        assert_eq!(h.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_back_queues_current_record() {
        let h = harness(MigrationPhase::DualWrite);
        let user = User::new("Ana", "a@x.com", "h1");
        create(&h.router, &user).await.unwrap();
        let now = storeshift_core::model::Timestamp::now();

        h.router
            .write(
                user.entity_key(),
                Operation::UpdatePassword,
                ShadowPlan::ReadBack,
                |store| async move { store.update_user_password(user.id, "h2", now).await },
            )
            .await
            .unwrap();

        let pending = h.queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        match &pending[1].write.mutation {
            Mutation::Update(DomainRecord::User(shadow)) => assert_eq!(shadow.password, "h2"),
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_read_back_queues_refresh() {
        let h = harness(MigrationPhase::DualWrite);
        let user = User::new("Ana", "a@x.com", "h1");
        create(&h.router, &user).await.unwrap();
        let now = storeshift_core::model::Timestamp::now();
        let document = h.document.clone();

        h.router
            .write(
                user.entity_key(),
                Operation::UpdatePassword,
                ShadowPlan::ReadBack,
                |store| async move {
                    store.update_user_password(user.id, "h2", now).await?;
                    document.set_offline(true);
                    Ok::<_, RepositoryError>(())
                },
            )
            .await
            .unwrap();

        let pending = h.queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].write.operation, Operation::UpdatePassword);
        assert_eq!(pending[1].write.mutation, Mutation::Refresh);

        h.document.set_offline(false);
        let replicator = ShadowReplicator::new(
            Arc::new(h.queue.clone()),
            Arc::new(h.document.clone()),
            Arc::new(h.key_value.clone()),
            h.router.notifier(),
            ReplicatorSettings::default(),
        );
        assert_eq!(replicator.drain_once().await.unwrap().applied, 2);
        let shadow = h.key_value.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(shadow.password, "h2");
    }

    #[tokio::test]
    async fn test_target_only_reads_key_value() {
        let h = harness(MigrationPhase::TargetOnly);
        let user = User::new("Ana", "a@x.com", "h1");
        h.key_value.create_user(&user).await.unwrap();

        let found = h
            .router
            .read(|store| async move { store.get_user_by_email("a@x.com").await })
            .await
            .unwrap();

        assert_eq!(found, Some(user));
        assert_eq!(h.document.calls(), 0);
    }

    #[tokio::test]
    async fn test_primary_timeout_is_backend_unavailable() {
        let h = harness(MigrationPhase::SourceOnly);
        let router = h.router.with_primary_timeout(Duration::from_millis(10));

        let result: Result<Option<User>> = router
            .read(|_store| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(None)
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_phase_change_mid_call_does_not_tear() {
        let h = harness(MigrationPhase::DualWriteVerify);
        let user = User::new("Ana", "a@x.com", "h1");
        let controller = &h.controller;
        let record = user.clone().into_record();

        h.router
            .write(
                user.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(Mutation::Create(record)),
                |store| async move {
                    controller.advance().await.unwrap();
                    store.create_user(&user).await
                },
            )
            .await
            .unwrap();

        assert_eq!(h.router.phase(), MigrationPhase::TargetOnly);
        assert_eq!(h.document.calls(), 1);
        assert_eq!(h.table.calls(), 0);
        assert_eq!(h.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sampled_read_publishes_mismatch() {
        let h = harness(MigrationPhase::DualWriteVerify);
        let router = h.router.with_sample_rate(1.0);
        let user = User::new("Ana", "a@x.com", "h1");
        h.document.create_user(&user).await.unwrap();
        let mut stale = user.clone();
        stale.name = "Old".to_string();
        h.key_value.create_user(&stale).await.unwrap();

        let found = router
            .read(|store| async move { store.get_user(user.id).await })
            .await
            .unwrap();
        router.wait_for_sampled_reads().await;

        assert_eq!(found.map(|u| u.name), Some("Ana".to_string()));
        let records = h.sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].differences[0].field, "name");
    }

    #[tokio::test]
    async fn test_sampled_read_skips_keys_with_queued_writes() {
        let h = harness(MigrationPhase::DualWriteVerify);
        let router = h.router.with_sample_rate(1.0);
        let user = User::new("Ana", "a@x.com", "h1");
        create(&router, &user).await.unwrap();

        router
            .read(|store| async move { store.get_user(user.id).await })
            .await
            .unwrap();
        router.wait_for_sampled_reads().await;

        assert!(h.sink.records().await.is_empty());
    }
}
