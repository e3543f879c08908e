//! One-off copy of existing document-store records into the key-value store.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use storeshift_core::migration::{Backend, MigrationPhase};
use storeshift_core::model::EntityType;
use storeshift_core::storage::{
    create_record, fetch_record, list_records, RepositoryError,
};

use super::queue::QueueError;
use super::router::MigrationRouter;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Bulk copy needs a dual-write phase, current phase is {0}")]
    Phase(MigrationPhase),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    pub entity_type: EntityType,
    pub scanned: usize,
    pub copied: usize,
    /// Already present in the key-value store. Never overwritten.
    pub already_present: usize,
    /// Left to the replicator because shadow writes are queued.
    pub pending: usize,
    /// Deleted from the document store after the listing.
    pub vanished: usize,
    /// Rejected by a uniqueness constraint held by another record.
    pub conflicts: usize,
}

impl CopyReport {
    fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            scanned: 0,
            copied: 0,
            already_present: 0,
            pending: 0,
            vanished: 0,
            conflicts: 0,
        }
    }
}

/// Copies records that predate dual writing.
///
/// Each key is handled under the router's key lock, so a copy never races a
/// live write of the same record.
pub struct BulkCopier {
    router: Arc<MigrationRouter>,
}

impl BulkCopier {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self { router }
    }

    pub async fn copy(&self, entity_type: EntityType) -> Result<CopyReport, CopyError> {
        let phase = self.router.phase();
        if !phase.is_dual_write() {
            return Err(CopyError::Phase(phase));
        }

        let document = Arc::clone(self.router.store(Backend::Document));
        let key_value = Arc::clone(self.router.store(Backend::KeyValue));
        let records = list_records(document.as_ref(), entity_type).await?;
        let mut report = CopyReport::new(entity_type);

        tracing::info!(
            entity_type = %entity_type,
            records = records.len(),
            "Starting bulk copy"
        );

        for record in records {
            report.scanned += 1;
            let key = record.key();
            let _guard = self.router.locks().lock(key).await;

            if self.router.queue().has_pending(&key).await? {
                report.pending += 1;
                continue;
            }
            if fetch_record(key_value.as_ref(), key).await?.is_some() {
                report.already_present += 1;
                continue;
            }
            let Some(current) = fetch_record(document.as_ref(), key).await? else {
                report.vanished += 1;
                continue;
            };

            match create_record(key_value.as_ref(), &current).await {
                Ok(()) => report.copied += 1,
                Err(RepositoryError::DuplicateKey { key: conflict, .. }) => {
                    tracing::warn!(
                        entity = %key,
                        conflict = %conflict,
                        "Bulk copy skipped record with conflicting unique key"
                    );
                    report.conflicts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::info!(
            entity_type = %entity_type,
            scanned = report.scanned,
            copied = report.copied,
            already_present = report.already_present,
            pending = report.pending,
            conflicts = report.conflicts,
            "Bulk copy finished"
        );
        Ok(report)
    }
}
