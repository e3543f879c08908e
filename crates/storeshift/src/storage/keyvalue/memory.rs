//! In-memory item table for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use storeshift_core::model::EntityType;
use tokio::sync::RwLock;

use super::codec::Item;
use super::keys;
use super::table::{ItemTable, TableError, TableResult, TableWrite, WriteCondition};

type TableKey = (String, String);

/// Item table backed by a sorted map.
///
/// Transactions check every condition before applying any write, matching
/// the all-or-nothing behaviour of DynamoDB transactions. `set_offline`
/// makes every call fail with `Unavailable`. `freeze_type_index` lets the
/// type index lag behind the table the way a global secondary index can.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTable {
    items: Arc<RwLock<BTreeMap<TableKey, Item>>>,
    frozen_index: Arc<RwLock<Option<Vec<Item>>>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of table calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Serves `query_entity_type` from a snapshot of the current items until
    /// `thaw_type_index`.
    pub async fn freeze_type_index(&self) {
        let snapshot = self.items.read().await.values().cloned().collect();
        *self.frozen_index.write().await = Some(snapshot);
    }

    pub async fn thaw_type_index(&self) {
        *self.frozen_index.write().await = None;
    }

    /// Number of stored items, projections included.
    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Writes an item directly, bypassing conditions. Used to seed drift in tests.
    pub async fn put_raw(&self, item: Item) {
        let key = item_key(&item);
        self.items.write().await.insert(key, item);
    }

    fn enter(&self) -> TableResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TableError::Unavailable(
                "in-memory table is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_s(item: &Item, name: &str) -> String {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default()
}

fn item_key(item: &Item) -> TableKey {
    (read_s(item, keys::PK), read_s(item, keys::SK))
}

fn condition_holds(current: Option<&Item>, condition: &WriteCondition) -> bool {
    match condition {
        WriteCondition::Always => true,
        WriteCondition::NotExists => current.is_none(),
        WriteCondition::Exists => current.is_some(),
        WriteCondition::AttributeEquals { name, value } => {
            current.and_then(|item| item.get(name)) == Some(value)
        }
    }
}

#[async_trait]
impl ItemTable for InMemoryTable {
    async fn get_item(&self, pk: &str, sk: &str) -> TableResult<Option<Item>> {
        self.enter()?;
        let items = self.items.read().await;
        Ok(items.get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn query_partition(&self, pk: &str, sk_prefix: Option<&str>) -> TableResult<Vec<Item>> {
        self.enter()?;
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|((item_pk, item_sk), _)| {
                item_pk == pk && sk_prefix.is_none_or(|prefix| item_sk.starts_with(prefix))
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn query_entity_type(&self, entity_type: EntityType) -> TableResult<Vec<Item>> {
        self.enter()?;
        let of_type = |item: &&Item| read_s(item, keys::GSI1_PK) == entity_type.as_str();
        if let Some(snapshot) = self.frozen_index.read().await.as_ref() {
            return Ok(snapshot.iter().filter(of_type).cloned().collect());
        }
        let items = self.items.read().await;
        Ok(items.values().filter(of_type).cloned().collect())
    }

    async fn transact_write(&self, writes: Vec<TableWrite>) -> TableResult<()> {
        self.enter()?;
        let mut items = self.items.write().await;

        for (index, write) in writes.iter().enumerate() {
            let (key, condition) = match write {
                TableWrite::Put { item, condition } => (item_key(item), condition),
                TableWrite::Delete { pk, sk, condition } => ((pk.clone(), sk.clone()), condition),
            };
            if !condition_holds(items.get(&key), condition) {
                return Err(TableError::ConditionFailed { index });
            }
        }

        for write in writes {
            match write {
                TableWrite::Put { item, .. } => {
                    items.insert(item_key(&item), item);
                }
                TableWrite::Delete { pk, sk, .. } => {
                    items.remove(&(pk, sk));
                }
            }
        }

        Ok(())
    }
}
