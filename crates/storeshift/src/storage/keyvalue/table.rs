//! The narrow table interface the key-value store needs.
//!
//! [`KeyValueStore`](super::KeyValueStore) only ever reads single items,
//! queries one partition, queries the type index and writes transactions.
//! Putting that behind a trait lets the same driver logic run against
//! DynamoDB and against an in-memory table in tests.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use storeshift_core::model::EntityType;
use storeshift_core::storage::RepositoryError;
use thiserror::Error;

use super::codec::Item;

/// Precondition attached to one write of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCondition {
    Always,
    /// The item must not exist yet.
    NotExists,
    /// The item must exist.
    Exists,
    /// The item must exist and `name` must equal `value`.
    AttributeEquals { name: String, value: AttributeValue },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableWrite {
    Put {
        item: Item,
        condition: WriteCondition,
    },
    Delete {
        pk: String,
        sk: String,
        condition: WriteCondition,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The condition of the write at `index` failed; nothing was written.
    #[error("Condition failed for write {index}")]
    ConditionFailed { index: usize },
    #[error("Table unavailable: {0}")]
    Unavailable(String),
    #[error("Table operation failed: {0}")]
    Failed(String),
}

impl From<TableError> for RepositoryError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Unavailable(msg) => RepositoryError::BackendUnavailable(msg),
            other => RepositoryError::QueryFailed(other.to_string()),
        }
    }
}

pub type TableResult<T> = std::result::Result<T, TableError>;

#[async_trait]
pub trait ItemTable: Send + Sync {
    /// Strongly consistent single-item read.
    async fn get_item(&self, pk: &str, sk: &str) -> TableResult<Option<Item>>;

    /// All items of a partition, optionally restricted to a sort key prefix.
    async fn query_partition(&self, pk: &str, sk_prefix: Option<&str>) -> TableResult<Vec<Item>>;

    /// All primary items of one entity type, via the type index.
    ///
    /// The index is a global secondary index and only eventually consistent:
    /// recent writes may be missing or show an older version.
    async fn query_entity_type(&self, entity_type: EntityType) -> TableResult<Vec<Item>>;

    /// Applies every write or none of them.
    async fn transact_write(&self, writes: Vec<TableWrite>) -> TableResult<()>;
}
