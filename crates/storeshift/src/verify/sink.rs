//! Destinations for reconciliation records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use storeshift_core::migration::ReconciliationRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write reconciliation record: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize reconciliation record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives reconciliation records from the verifier and sampled reads.
#[async_trait]
pub trait ReconciliationSink: Send + Sync {
    async fn publish(&self, record: &ReconciliationRecord) -> Result<(), SinkError>;
}

/// Emits one structured `warn` event per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl ReconciliationSink for TracingSink {
    async fn publish(&self, record: &ReconciliationRecord) -> Result<(), SinkError> {
        let fields: Vec<&str> = record.differences.iter().map(|d| d.field.as_str()).collect();
        tracing::warn!(
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            matched = record.matched,
            found_in_document = record.found_in_document,
            found_in_key_value = record.found_in_key_value,
            fields = ?fields,
            differences = %serde_json::to_string(&record.differences)?,
            checked_at = %record.checked_at,
            "Reconciliation mismatch"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReconciliationSink for JsonLinesSink {
    async fn publish(&self, record: &ReconciliationRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ReconciliationRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ReconciliationRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ReconciliationSink for MemorySink {
    async fn publish(&self, record: &ReconciliationRecord) -> Result<(), SinkError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Publishes to every inner sink, returning the first error after trying all.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReconciliationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ReconciliationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ReconciliationSink for FanoutSink {
    async fn publish(&self, record: &ReconciliationRecord) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.publish(record).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeshift_core::model::{Entity, EntityKey, Product};

    fn mismatch() -> ReconciliationRecord {
        let product = Product::new("Mug", "kitchen", 1_500);
        let mut shadow = product.clone();
        shadow.price = 1_400;
        ReconciliationRecord::compare(
            product.entity_key(),
            Some(&product.into_record()),
            Some(&shadow.into_record()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconciliation.jsonl");
        let sink = JsonLinesSink::open(&path).await.unwrap();

        sink.publish(&mismatch()).await.unwrap();
        sink.publish(&mismatch()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: ReconciliationRecord = serde_json::from_str(lines[0]).unwrap();
        assert!(!parsed.matched);
        assert_eq!(parsed.differences[0].field, "price");
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let fanout = FanoutSink::new(vec![
            Arc::new(a.clone()),
            Arc::new(TracingSink),
            Arc::new(b.clone()),
        ]);

        fanout.publish(&mismatch()).await.unwrap();

        assert_eq!(a.records().await.len(), 1);
        assert_eq!(b.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_sided_record_serializes() {
        let key = EntityKey::new(
            storeshift_core::model::EntityType::Review,
            uuid::Uuid::new_v4(),
        );
        let record = ReconciliationRecord::compare(key, None, None).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entityType"], "Review");
        assert_eq!(json["foundInDocument"], false);
    }
}
