//! Wiring of stores, queue, router and facades.

use std::sync::Arc;

use anyhow::{Context, Result};

use storeshift_core::migration::MigrationPhase;
use storeshift_core::storage::Store;

use crate::config::Config;
use crate::migration::{
    read_phase_file, BulkCopier, InMemoryShadowQueue, MigrationRouter, PhaseController,
    ShadowQueue, ShadowReplicator, SqliteShadowQueue,
};
use crate::repository::Repositories;
use crate::storage::document::MongoDocumentStore;
use crate::storage::inmemory::InMemoryDocumentStore;
use crate::storage::keyvalue::{DynamoDbTable, InMemoryTable, KeyValueStore};
use crate::verify::{
    ConsistencyVerifier, FanoutSink, JsonLinesSink, ReconciliationSink, TracingSink,
};

/// A fully wired migration layer.
pub struct App {
    pub config: Config,
    pub controller: PhaseController,
    pub router: Arc<MigrationRouter>,
    pub repositories: Repositories,
    pub document: Arc<dyn Store>,
    pub key_value: Arc<dyn Store>,
    pub queue: Arc<dyn ShadowQueue>,
    pub sink: Arc<dyn ReconciliationSink>,
    /// Present when running against DynamoDB.
    pub table: Option<DynamoDbTable>,
}

impl App {
    /// Connects to MongoDB, DynamoDB and the shadow queue file.
    pub async fn connect(config: Config) -> Result<Self> {
        let document = MongoDocumentStore::connect(&config.mongodb_uri, &config.mongodb_database)
            .await
            .context("Failed to connect to MongoDB")?;

        let table = DynamoDbTable::connect(
            config.aws_endpoint_url.as_deref(),
            &config.aws_region,
            config.dynamodb_table.clone(),
        )
        .await;
        let key_value = KeyValueStore::new(Arc::new(table.clone()));

        let queue = SqliteShadowQueue::open(&config.shadow_queue_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open shadow queue at {}",
                    config.shadow_queue_path.display()
                )
            })?;

        let sink = build_sink(&config).await?;
        let mut app = Self::from_parts(
            config,
            Arc::new(document),
            Arc::new(key_value),
            Arc::new(queue),
            sink,
        )
        .await?;
        app.table = Some(table);

        tracing::info!(
            phase = %app.controller.current(),
            table = %app.config.dynamodb_table,
            database = %app.config.mongodb_database,
            "Migration layer ready"
        );
        Ok(app)
    }

    /// Runs entirely in memory, for local experiments and tests.
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::from_parts(
            config,
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(KeyValueStore::new(Arc::new(InMemoryTable::new()))),
            Arc::new(InMemoryShadowQueue::new()),
            Arc::new(TracingSink),
        )
        .await
    }

    pub async fn from_parts(
        config: Config,
        document: Arc<dyn Store>,
        key_value: Arc<dyn Store>,
        queue: Arc<dyn ShadowQueue>,
        sink: Arc<dyn ReconciliationSink>,
    ) -> Result<Self> {
        let phase = initial_phase(&config).await?;
        if phase == MigrationPhase::TargetOnly {
            let pending = queue.len().await.context("Failed to read the shadow queue")?;
            if pending > 0 {
                tracing::warn!(
                    pending,
                    "Starting in TARGET_ONLY with queued shadow writes; only entries newer than the stored record will apply"
                );
            }
        }
        let mut controller = PhaseController::new(phase).with_queue(Arc::clone(&queue));
        if let Some(path) = &config.phase_file {
            controller = controller.with_phase_file(path);
        }

        let router = Arc::new(
            MigrationRouter::new(
                Arc::clone(&document),
                Arc::clone(&key_value),
                controller.handle(),
                Arc::clone(&queue),
            )
            .with_sink(Arc::clone(&sink))
            .with_primary_timeout(config.primary_timeout())
            .with_sample_rate(config.verify_sample_rate),
        );
        let repositories = Repositories::new(Arc::clone(&router));

        Ok(Self {
            config,
            controller,
            router,
            repositories,
            document,
            key_value,
            queue,
            sink,
            table: None,
        })
    }

    pub fn replicator(&self) -> ShadowReplicator {
        ShadowReplicator::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.document),
            Arc::clone(&self.key_value),
            self.router.notifier(),
            self.config.replicator_settings(),
        )
    }

    pub fn verifier(&self) -> ConsistencyVerifier {
        ConsistencyVerifier::new(
            Arc::clone(&self.document),
            Arc::clone(&self.key_value),
            self.controller.handle(),
            Arc::clone(&self.sink),
        )
        .with_queue(Arc::clone(&self.queue))
        .with_locks(Arc::clone(self.router.locks()))
    }

    pub fn copier(&self) -> BulkCopier {
        BulkCopier::new(Arc::clone(&self.router))
    }
}

/// The phase file wins over `MIGRATION_PHASE` when both are set.
async fn initial_phase(config: &Config) -> Result<MigrationPhase> {
    if let Some(path) = &config.phase_file {
        if let Some(phase) = read_phase_file(path).await? {
            return Ok(phase);
        }
    }
    Ok(config.phase)
}

async fn build_sink(config: &Config) -> Result<Arc<dyn ReconciliationSink>> {
    let Some(path) = &config.reconciliation_log_path else {
        return Ok(Arc::new(TracingSink));
    };
    let file = JsonLinesSink::open(path)
        .await
        .with_context(|| format!("Failed to open reconciliation log {}", path.display()))?;
    Ok(Arc::new(FanoutSink::new(vec![
        Arc::new(TracingSink),
        Arc::new(file),
    ])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config::LogFormat;
    use storeshift_core::model::User;

    fn config(phase: MigrationPhase, phase_file: Option<PathBuf>) -> Config {
        Config {
            phase,
            phase_file,
            mongodb_uri: String::new(),
            mongodb_database: "shop".to_string(),
            dynamodb_table: "storeshift".to_string(),
            aws_endpoint_url: None,
            aws_region: "us-east-1".to_string(),
            shadow_queue_path: PathBuf::from("unused.db"),
            primary_timeout_ms: 1_000,
            shadow_timeout_ms: 1_000,
            verify_sample_rate: 0.0,
            backfill_batch_size: 10,
            backfill_retry_seconds: 0,
            verify_interval_seconds: 0,
            reconciliation_log_path: None,
            log_format: LogFormat::Pretty,
        }
    }

    #[tokio::test]
    async fn test_phase_file_overrides_env_phase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase");
        tokio::fs::write(&path, "DUAL_WRITE_VERIFY").await.unwrap();

        let app = App::in_memory(config(MigrationPhase::SourceOnly, Some(path)))
            .await
            .unwrap();

        assert_eq!(app.router.phase(), MigrationPhase::DualWriteVerify);
    }

    #[tokio::test]
    async fn test_in_memory_end_to_end() {
        let app = App::in_memory(config(MigrationPhase::DualWrite, None))
            .await
            .unwrap();
        let user = User::new("Ana", "a@x.com", "h1");

        app.repositories.users.create(&user).await.unwrap();
        let report = app.replicator().drain_once().await.unwrap();
        assert_eq!(report.applied, 1);

        app.controller.advance().await.unwrap();
        let verification = app.verifier().run(&Default::default()).await.unwrap();
        assert_eq!(verification.checked, 1);
        assert!(verification.is_consistent());

        app.controller.advance().await.unwrap();
        assert_eq!(
            app.repositories.users.find_by_email("a@x.com").await.unwrap(),
            Some(user)
        );
    }

    #[tokio::test]
    async fn test_advance_to_target_only_needs_drained_queue() {
        let app = App::in_memory(config(MigrationPhase::DualWriteVerify, None))
            .await
            .unwrap();
        app.repositories
            .users
            .create(&User::new("Ana", "a@x.com", "h1"))
            .await
            .unwrap();

        assert!(app.controller.advance().await.is_err());
        assert_eq!(app.router.phase(), MigrationPhase::DualWriteVerify);

        app.replicator().drain_once().await.unwrap();
        assert_eq!(
            app.controller.advance().await.unwrap(),
            MigrationPhase::TargetOnly
        );
    }
}
