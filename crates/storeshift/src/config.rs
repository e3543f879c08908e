use std::{env, path::PathBuf, time::Duration};

use storeshift_core::migration::MigrationPhase;

use crate::migration::ReplicatorSettings;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Phase at start-up (default: SOURCE_ONLY)
    pub phase: MigrationPhase,
    /// File holding the operator-controlled phase, polled by the worker
    pub phase_file: Option<PathBuf>,
    /// MongoDB connection string (default: "mongodb://localhost:27017")
    pub mongodb_uri: String,
    /// MongoDB database name (default: "shop")
    pub mongodb_database: String,
    /// DynamoDB table name (default: "storeshift")
    pub dynamodb_table: String,
    /// Endpoint override, e.g. DynamoDB Local
    pub aws_endpoint_url: Option<String>,
    /// AWS region (default: "us-east-1")
    pub aws_region: String,
    /// SQLite file for the shadow write queue (default: "shadow-queue.db")
    pub shadow_queue_path: PathBuf,
    /// Timeout for primary store calls in milliseconds (default: 5,000)
    pub primary_timeout_ms: u64,
    /// Timeout for shadow store calls in milliseconds (default: 5,000)
    pub shadow_timeout_ms: u64,
    /// Fraction of DUAL_WRITE_VERIFY reads checked against the key-value store (default: 0.05)
    pub verify_sample_rate: f64,
    /// Shadow writes applied per drain (default: 100)
    pub backfill_batch_size: usize,
    /// Base retry delay for failed shadow writes in seconds (default: 5)
    pub backfill_retry_seconds: u64,
    /// Interval between scheduled verifications in seconds, 0 disables (default: 0)
    pub verify_interval_seconds: u64,
    /// JSON lines file for reconciliation records
    pub reconciliation_log_path: Option<PathBuf>,
    /// `json` or `pretty` (default: pretty)
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MIGRATION_PHASE` - Phase at start-up (default: SOURCE_ONLY)
    /// - `MIGRATION_PHASE_FILE` - Operator phase file (default: unset)
    /// - `MONGODB_URI` - MongoDB connection string (default: "mongodb://localhost:27017")
    /// - `MONGODB_DATABASE` - MongoDB database (default: "shop")
    /// - `DYNAMODB_TABLE_NAME` - DynamoDB table (default: "storeshift")
    /// - `AWS_ENDPOINT_URL` - Endpoint override (default: unset)
    /// - `AWS_REGION` - AWS region (default: "us-east-1")
    /// - `SHADOW_QUEUE_PATH` - Shadow queue SQLite file (default: "shadow-queue.db")
    /// - `PRIMARY_TIMEOUT_MS` - Primary call timeout (default: 5,000)
    /// - `SHADOW_TIMEOUT_MS` - Shadow call timeout (default: 5,000)
    /// - `VERIFY_SAMPLE_RATE` - Sampled read fraction (default: 0.05)
    /// - `BACKFILL_BATCH_SIZE` - Entries per drain (default: 100)
    /// - `BACKFILL_RETRY_SECONDS` - Base retry delay (default: 5)
    /// - `VERIFY_INTERVAL_SECONDS` - Scheduled verification interval (default: 0, disabled)
    /// - `RECONCILIATION_LOG_PATH` - Reconciliation JSON lines file (default: unset)
    /// - `LOG_FORMAT` - `json` or `pretty` (default: pretty)
    pub fn from_env() -> Self {
        Self {
            phase: env::var("MIGRATION_PHASE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            phase_file: env::var("MIGRATION_PHASE_FILE").ok().map(PathBuf::from),
            mongodb_uri: env::var("MONGODB_URI")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            mongodb_database: env::var("MONGODB_DATABASE").unwrap_or_else(|_| "shop".to_string()),
            dynamodb_table: env::var("DYNAMODB_TABLE_NAME")
                .unwrap_or_else(|_| "storeshift".to_string()),
            aws_endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            shadow_queue_path: env::var("SHADOW_QUEUE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("shadow-queue.db")),
            primary_timeout_ms: env::var("PRIMARY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            shadow_timeout_ms: env::var("SHADOW_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            verify_sample_rate: env::var("VERIFY_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|rate: &f64| (0.0..=1.0).contains(rate))
                .unwrap_or(0.05),
            backfill_batch_size: env::var("BACKFILL_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(100),
            backfill_retry_seconds: env::var("BACKFILL_RETRY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            verify_interval_seconds: env::var("VERIFY_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            reconciliation_log_path: env::var("RECONCILIATION_LOG_PATH")
                .ok()
                .map(PathBuf::from),
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    /// Scheduled verification interval, `None` when disabled.
    pub fn verify_interval(&self) -> Option<Duration> {
        (self.verify_interval_seconds > 0).then(|| Duration::from_secs(self.verify_interval_seconds))
    }

    pub fn replicator_settings(&self) -> ReplicatorSettings {
        let retry_base = Duration::from_secs(self.backfill_retry_seconds);
        ReplicatorSettings {
            batch_size: self.backfill_batch_size,
            shadow_timeout: Duration::from_millis(self.shadow_timeout_ms),
            retry_base,
            retry_max: retry_base.saturating_mul(60),
            ..ReplicatorSettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
