use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use storeshift_core::migration::{MigrationPhase, ReconciliationRecord};
use storeshift_core::model::{DomainRecord, EntityKey, EntityType};
use storeshift_core::storage::{fetch_record, list_records, RepositoryError, Store};

use super::sink::{ReconciliationSink, SinkError};
use crate::migration::{KeyLocks, PhaseHandle, QueueError, ShadowQueue};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Verification is not available in {0}: the key-value store is not populated yet")]
    SourceOnly(MigrationPhase),

    #[error("Sample rate must be within 0.0..=1.0, got {0}")]
    InvalidSampleRate(f64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Failed to compare records: {0}")]
    Compare(#[from] serde_json::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOptions {
    pub entities: Vec<EntityType>,
    /// Fraction of keys compared, `1.0` for a full scan.
    pub sample_rate: f64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            entities: EntityType::ALL.to_vec(),
            sample_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub checked: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub missing_in_document: usize,
    pub missing_in_keyvalue: usize,
    /// Keys left out because shadow writes for them are still queued.
    pub skipped_pending: usize,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatched == 0 && self.missing_in_document == 0 && self.missing_in_keyvalue == 0
    }

    fn count(&mut self, record: &ReconciliationRecord) {
        self.checked += 1;
        if record.matched {
            self.matched += 1;
        } else if !record.found_in_document {
            self.missing_in_document += 1;
        } else if !record.found_in_key_value {
            self.missing_in_keyvalue += 1;
        } else {
            self.mismatched += 1;
        }
    }
}

/// Out-of-band comparison of both stores. Never writes to either.
pub struct ConsistencyVerifier {
    document: Arc<dyn Store>,
    key_value: Arc<dyn Store>,
    phase: PhaseHandle,
    sink: Arc<dyn ReconciliationSink>,
    queue: Option<Arc<dyn ShadowQueue>>,
    locks: Option<Arc<KeyLocks>>,
}

impl ConsistencyVerifier {
    pub fn new(
        document: Arc<dyn Store>,
        key_value: Arc<dyn Store>,
        phase: PhaseHandle,
        sink: Arc<dyn ReconciliationSink>,
    ) -> Self {
        Self {
            document,
            key_value,
            phase,
            sink,
            queue: None,
            locks: None,
        }
    }

    /// Skips keys with queued shadow writes, which would otherwise report
    /// replication lag as drift.
    pub fn with_queue(mut self, queue: Arc<dyn ShadowQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Rechecks differences under the router's per-key locks so an
    /// in-flight write is never reported as drift.
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub async fn run(&self, options: &VerifyOptions) -> Result<VerificationReport, VerifyError> {
        let phase = self.phase.current();
        if phase == MigrationPhase::SourceOnly {
            return Err(VerifyError::SourceOnly(phase));
        }
        if !(0.0..=1.0).contains(&options.sample_rate) {
            return Err(VerifyError::InvalidSampleRate(options.sample_rate));
        }

        let mut report = VerificationReport::default();
        for &entity_type in &options.entities {
            self.verify_entity(entity_type, options.sample_rate, &mut report)
                .await?;
        }

        tracing::info!(
            phase = %phase,
            checked = report.checked,
            matched = report.matched,
            mismatched = report.mismatched,
            missing_in_document = report.missing_in_document,
            missing_in_keyvalue = report.missing_in_keyvalue,
            skipped_pending = report.skipped_pending,
            "Verification finished"
        );
        Ok(report)
    }

    async fn verify_entity(
        &self,
        entity_type: EntityType,
        sample_rate: f64,
        report: &mut VerificationReport,
    ) -> Result<(), VerifyError> {
        let (document, key_value) = try_join(
            list_records(self.document.as_ref(), entity_type),
            list_records(self.key_value.as_ref(), entity_type),
        )
        .await?;

        let document = by_id(document);
        let key_value = by_id(key_value);
        let ids: BTreeSet<Uuid> = document.keys().chain(key_value.keys()).copied().collect();

        tracing::debug!(
            entity_type = %entity_type,
            document = document.len(),
            key_value = key_value.len(),
            "Comparing entity"
        );

        for id in ids {
            if sample_rate < 1.0 && rand::random::<f64>() >= sample_rate {
                continue;
            }
            let key = EntityKey::new(entity_type, id);
            if let Some(queue) = &self.queue {
                if queue.has_pending(&key).await? {
                    report.skipped_pending += 1;
                    continue;
                }
            }

            let mut record =
                ReconciliationRecord::compare(key, document.get(&id), key_value.get(&id))?;
            if !record.matched {
                match self.recheck(key).await? {
                    Some(current) => record = current,
                    None => {
                        report.skipped_pending += 1;
                        continue;
                    }
                }
            }
            report.count(&record);
            if !record.matched {
                self.sink.publish(&record).await?;
            }
        }
        Ok(())
    }

    /// Compares fresh point reads of one key.
    ///
    /// The two listings are taken at different moments and the key-value
    /// listing comes from its eventually consistent type index, so a
    /// difference between them proves nothing on its own. Returns `None` when
    /// shadow writes for the key were queued in the meantime.
    async fn recheck(&self, key: EntityKey) -> Result<Option<ReconciliationRecord>, VerifyError> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(key).await),
            None => None,
        };
        if let Some(queue) = &self.queue {
            if queue.has_pending(&key).await? {
                return Ok(None);
            }
        }

        let (document, key_value) = try_join(
            fetch_record(self.document.as_ref(), key),
            fetch_record(self.key_value.as_ref(), key),
        )
        .await?;
        Ok(Some(ReconciliationRecord::compare(
            key,
            document.as_ref(),
            key_value.as_ref(),
        )?))
    }

    /// Runs the verifier every `interval` until shutdown.
    pub async fn run_every(
        &self,
        interval: Duration,
        options: VerifyOptions,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run(&options).await {
                        Ok(_) => {}
                        Err(VerifyError::SourceOnly(_)) => {
                            tracing::debug!("Skipping scheduled verification in SOURCE_ONLY");
                        }
                        Err(err) => tracing::error!(error = %err, "Scheduled verification failed"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Verifier shutting down");
                    break;
                }
            }
        }
    }
}

fn by_id(records: Vec<DomainRecord>) -> HashMap<Uuid, DomainRecord> {
    records.into_iter().map(|r| (r.id(), r)).collect()
}
