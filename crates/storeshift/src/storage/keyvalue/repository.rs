//! Key-value store driver.
//!
//! Implements the repository traits on top of any [`ItemTable`]. Every write
//! touches the primary item and its projections in one transaction. Updates
//! and deletes read the current item first and make the transaction
//! conditional on its `updatedAt`, retrying a few times when another writer
//! got there first.

use std::sync::Arc;

use async_trait::async_trait;
use storeshift_core::model::{
    DomainRecord, Entity, EntityKey, EntityType, Order, PasswordReset, Product, Review, Timestamp,
    User,
};
use storeshift_core::storage::{
    OrderFilter, OrderRepository, ProductFilter, ProductRepository, RecordReplay,
    RepositoryError, Result, ReviewFilter, ReviewRepository, UserFilter, UserRepository,
};
use uuid::Uuid;

use super::codec::{self, Item, ItemSet};
use super::keys;
use super::table::{ItemTable, TableError, TableWrite, WriteCondition};

const MAX_WRITE_ATTEMPTS: usize = 3;

/// Repository over the single-table layout.
pub struct KeyValueStore<T: ItemTable> {
    table: Arc<T>,
}

impl<T: ItemTable> Clone for KeyValueStore<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: ItemTable> KeyValueStore<T> {
    pub fn new(table: Arc<T>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<T> {
        &self.table
    }

    // ========================================================================
    // Codec boundary
    // ========================================================================

    fn encode(&self, record: &DomainRecord) -> Result<ItemSet> {
        codec::encode(record).inspect_err(|err| {
            tracing::error!(
                entity_type = %record.entity_type(),
                entity_id = %record.id(),
                error = %err,
                "Failed to encode record for the key-value store"
            );
        })
    }

    fn decode<E: Entity>(&self, item: &Item) -> Result<E> {
        let record = codec::decode(item).inspect_err(|err| {
            tracing::error!(
                pk = ?item.get(keys::PK),
                sk = ?item.get(keys::SK),
                error = %err,
                "Failed to decode key-value item"
            );
        })?;
        let found = record.entity_type();
        E::from_record(record).ok_or_else(|| {
            let err = RepositoryError::encoding(
                E::ENTITY_TYPE,
                format!("item decoded to a {found} record"),
            );
            tracing::error!(pk = ?item.get(keys::PK), error = %err, "Unexpected item type");
            err
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn load(&self, key: EntityKey) -> Result<Option<(Item, DomainRecord)>> {
        let pk = keys::primary_key(key);
        match self.table.get_item(&pk, &pk).await? {
            Some(item) => {
                let record = codec::decode(&item).inspect_err(|err| {
                    tracing::error!(pk = %pk, error = %err, "Failed to decode key-value item");
                })?;
                Ok(Some((item, record)))
            }
            None => Ok(None),
        }
    }

    async fn find<E: Entity>(&self, id: Uuid) -> Result<Option<E>> {
        let pk = keys::primary_key(EntityKey::new(E::ENTITY_TYPE, id));
        match self.table.get_item(&pk, &pk).await? {
            Some(item) => Ok(Some(self.decode(&item)?)),
            None => Ok(None),
        }
    }

    async fn find_in_partition<E: Entity>(&self, pk: &str) -> Result<Vec<E>> {
        let prefix = keys::entity_prefix(E::ENTITY_TYPE);
        let items = self.table.query_partition(pk, Some(prefix)).await?;
        items.iter().map(|item| self.decode(item)).collect()
    }

    /// Goes through the type index, which is eventually consistent: a write
    /// acknowledged a moment ago may be missing or stale in the result. Point
    /// reads by id and the per-user partitions are strongly consistent.
    async fn list_all<E: Entity>(&self) -> Result<Vec<E>> {
        let items = self.table.query_entity_type(E::ENTITY_TYPE).await?;
        items.iter().map(|item| self.decode(item)).collect()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    async fn insert(&self, record: DomainRecord) -> Result<()> {
        let set = self.encode(&record)?;

        let mut writes = vec![TableWrite::Put {
            item: set.primary.clone(),
            condition: WriteCondition::NotExists,
        }];
        writes.extend(set.projections.iter().map(|projection| TableWrite::Put {
            item: projection.item.clone(),
            condition: if projection.unique {
                WriteCondition::NotExists
            } else {
                WriteCondition::Always
            },
        }));

        match self.table.transact_write(writes).await {
            Ok(()) => Ok(()),
            Err(TableError::ConditionFailed { index }) => Err(RepositoryError::DuplicateKey {
                entity_type: record.entity_type(),
                key: conflicting_key(&record, &set, index),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Swaps `current` for `next` if the stored primary item still matches
    /// `current_item`. Returns `false` when another writer changed it first.
    async fn replace(
        &self,
        key: EntityKey,
        current_item: &Item,
        current: &DomainRecord,
        next: &DomainRecord,
    ) -> Result<bool> {
        let old = self.encode(current)?;
        let new = self.encode(next)?;

        let mut writes = vec![TableWrite::Put {
            item: new.primary.clone(),
            condition: version_condition(key, current_item)?,
        }];

        let old_keys = old.projection_keys();
        let new_keys = new.projection_keys();
        writes.extend(new.projections.iter().map(|projection| {
            let claimed = projection.unique && !old_keys.contains(&projection.key());
            TableWrite::Put {
                item: projection.item.clone(),
                condition: if claimed {
                    WriteCondition::NotExists
                } else {
                    WriteCondition::Always
                },
            }
        }));
        writes.extend(
            old_keys
                .into_iter()
                .filter(|stale| !new_keys.contains(stale))
                .map(|(pk, sk)| TableWrite::Delete {
                    pk,
                    sk,
                    condition: WriteCondition::Always,
                }),
        );

        match self.table.transact_write(writes).await {
            Ok(()) => Ok(true),
            Err(TableError::ConditionFailed { index: 0 }) => Ok(false),
            Err(TableError::ConditionFailed { index }) => Err(RepositoryError::DuplicateKey {
                entity_type: key.entity_type,
                key: conflicting_key(next, &new, index),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn modify<F>(&self, key: EntityKey, change: F) -> Result<()>
    where
        F: Fn(&DomainRecord) -> Result<DomainRecord> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some((current_item, current)) = self.load(key).await? else {
                return Err(RepositoryError::not_found(key.entity_type, key.id));
            };
            let next = change(&current)?;
            if self.replace(key, &current_item, &current, &next).await? {
                return Ok(());
            }
            tracing::debug!(entity = %key, attempt, "Concurrent modification, retrying");
        }

        Err(gave_up(key, "update"))
    }

    async fn modify_entity<E, F>(&self, id: Uuid, change: F) -> Result<()>
    where
        E: Entity,
        F: Fn(&mut E) + Send + Sync,
    {
        self.modify(EntityKey::new(E::ENTITY_TYPE, id), |current| {
            let mut entity = E::from_record(current.clone()).ok_or_else(|| {
                RepositoryError::encoding(
                    E::ENTITY_TYPE,
                    format!("item decoded to a {} record", current.entity_type()),
                )
            })?;
            change(&mut entity);
            Ok(entity.into_record())
        })
        .await
    }

    async fn remove(&self, key: EntityKey) -> Result<()> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some((current_item, current)) = self.load(key).await? else {
                return Ok(());
            };
            let set = self.encode(&current)?;

            let (pk, sk) = set.primary_key();
            let mut writes = vec![TableWrite::Delete {
                pk,
                sk,
                condition: version_condition(key, &current_item)?,
            }];
            writes.extend(
                set.projection_keys()
                    .into_iter()
                    .map(|(pk, sk)| TableWrite::Delete {
                        pk,
                        sk,
                        condition: WriteCondition::Always,
                    }),
            );

            match self.table.transact_write(writes).await {
                Ok(()) => return Ok(()),
                Err(TableError::ConditionFailed { .. }) => {
                    tracing::debug!(entity = %key, attempt, "Concurrent modification, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(gave_up(key, "delete"))
    }

    async fn put_unless_newer(&self, record: &DomainRecord) -> Result<bool> {
        let key = record.key();
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.load(key).await? {
                None => match self.insert(record.clone()).await {
                    Ok(()) => return Ok(true),
                    Err(RepositoryError::DuplicateKey { key: taken, .. })
                        if taken == key.id.to_string() =>
                    {
                        tracing::debug!(entity = %key, attempt, "Concurrent create, retrying");
                    }
                    Err(err) => return Err(err),
                },
                Some((_, current)) if current.updated_at() > record.updated_at() => {
                    return Ok(false);
                }
                Some((current_item, current)) => {
                    if self.replace(key, &current_item, &current, record).await? {
                        return Ok(true);
                    }
                    tracing::debug!(entity = %key, attempt, "Concurrent modification, retrying");
                }
            }
        }

        Err(gave_up(key, "replay"))
    }

    async fn mark_paid(
        &self,
        id: Uuid,
        paid_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Option<Order>> {
        let key = EntityKey::new(EntityType::Order, id);
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some((current_item, current)) = self.load(key).await? else {
                return Ok(None);
            };
            let DomainRecord::Order(order) = &current else {
                return Err(RepositoryError::encoding(
                    EntityType::Order,
                    format!("item decoded to a {} record", current.entity_type()),
                ));
            };
            if order.is_paid() {
                return Ok(Some(order.clone()));
            }

            let mut paid = order.clone();
            paid.paid_at = Some(paid_at);
            paid.updated_at = updated_at;
            let next = DomainRecord::Order(paid.clone());
            if self.replace(key, &current_item, &current, &next).await? {
                return Ok(Some(paid));
            }
            tracing::debug!(entity = %key, attempt, "Concurrent modification, retrying");
        }

        Err(gave_up(key, "payment"))
    }
}

fn gave_up(key: EntityKey, action: &str) -> RepositoryError {
    RepositoryError::QueryFailed(format!(
        "{key} kept changing during {action}, gave up after {MAX_WRITE_ATTEMPTS} attempts"
    ))
}

fn version_condition(key: EntityKey, item: &Item) -> Result<WriteCondition> {
    let value = codec::version_attribute(item).ok_or_else(|| {
        RepositoryError::encoding(key.entity_type, "missing attribute `updatedAt`")
    })?;
    Ok(WriteCondition::AttributeEquals {
        name: "updatedAt".to_string(),
        value,
    })
}

/// Names the key behind a failed write: the id for the primary item, the
/// projection partition otherwise.
fn conflicting_key(record: &DomainRecord, set: &ItemSet, index: usize) -> String {
    match index.checked_sub(1).and_then(|i| set.projections.get(i)) {
        Some(projection) => projection.key().0,
        None => record.id().to_string(),
    }
}

fn count<E>(items: &[E]) -> u64 {
    items.len() as u64
}

// ============================================================================
// UserRepository implementation
// ============================================================================

#[async_trait]
impl<T: ItemTable + 'static> UserRepository for KeyValueStore<T> {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.find(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.find_in_partition(&keys::email_pk(email)).await?;
        Ok(users.into_iter().next())
    }

    async fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        let users = self.find_in_partition(&keys::reset_token_pk(token)).await?;
        Ok(users.into_iter().next())
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let users: Vec<User> = self.list_all().await?;
        Ok(users.into_iter().filter(|u| filter.matches(u)).collect())
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        Ok(count(&self.list_users(filter).await?))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.insert(DomainRecord::User(user.clone())).await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.modify_entity(user.id, |current: &mut User| *current = user.clone())
            .await
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        self.remove(EntityKey::new(EntityType::User, id)).await
    }

    async fn update_user_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.modify_entity(id, |user: &mut User| {
            user.password = password_hash.to_string();
            user.updated_at = updated_at;
        })
        .await
    }

    async fn set_user_reset_token(
        &self,
        id: Uuid,
        reset: Option<&PasswordReset>,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.modify_entity(id, |user: &mut User| {
            user.reset_password = reset.cloned();
            user.updated_at = updated_at;
        })
        .await
    }
}

// ============================================================================
// ProductRepository implementation
// ============================================================================

#[async_trait]
impl<T: ItemTable + 'static> ProductRepository for KeyValueStore<T> {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        self.find(id).await
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        let products: Vec<Product> = match &filter.category {
            Some(category) => self.find_in_partition(&keys::category_pk(category)).await?,
            None => self.list_all().await?,
        };
        Ok(products.into_iter().filter(|p| filter.matches(p)).collect())
    }

    async fn count_products(&self, filter: &ProductFilter) -> Result<u64> {
        Ok(count(&self.list_products(filter).await?))
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        self.insert(DomainRecord::Product(product.clone())).await
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        self.modify_entity(product.id, |current: &mut Product| {
            *current = product.clone()
        })
        .await
    }

    async fn delete_product(&self, id: Uuid) -> Result<()> {
        self.remove(EntityKey::new(EntityType::Product, id)).await
    }
}

// ============================================================================
// OrderRepository implementation
// ============================================================================

#[async_trait]
impl<T: ItemTable + 'static> OrderRepository for KeyValueStore<T> {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        self.find(id).await
    }

    async fn get_order_by_code(&self, order_code: i64) -> Result<Option<Order>> {
        let orders = self
            .find_in_partition(&keys::order_code_pk(order_code))
            .await?;
        Ok(orders.into_iter().next())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let orders: Vec<Order> = match filter.user_id {
            Some(user_id) => self.find_in_partition(&keys::user_pk(user_id)).await?,
            None => self.list_all().await?,
        };
        Ok(orders.into_iter().filter(|o| filter.matches(o)).collect())
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<u64> {
        Ok(count(&self.list_orders(filter).await?))
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        self.insert(DomainRecord::Order(order.clone())).await
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.modify_entity(order.id, |current: &mut Order| *current = order.clone())
            .await
    }

    async fn mark_order_paid(
        &self,
        id: Uuid,
        paid_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Option<Order>> {
        self.mark_paid(id, paid_at, updated_at).await
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        self.remove(EntityKey::new(EntityType::Order, id)).await
    }
}

// ============================================================================
// ReviewRepository implementation
// ============================================================================

#[async_trait]
impl<T: ItemTable + 'static> ReviewRepository for KeyValueStore<T> {
    async fn get_review(&self, id: Uuid) -> Result<Option<Review>> {
        self.find(id).await
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>> {
        let reviews: Vec<Review> = match (filter.product_id, filter.user_id) {
            (Some(product_id), _) => self.find_in_partition(&keys::product_pk(product_id)).await?,
            (None, Some(user_id)) => self.find_in_partition(&keys::user_pk(user_id)).await?,
            (None, None) => self.list_all().await?,
        };
        Ok(reviews.into_iter().filter(|r| filter.matches(r)).collect())
    }

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<u64> {
        Ok(count(&self.list_reviews(filter).await?))
    }

    async fn create_review(&self, review: &Review) -> Result<()> {
        self.insert(DomainRecord::Review(review.clone())).await
    }

    async fn update_review(&self, review: &Review) -> Result<()> {
        self.modify_entity(review.id, |current: &mut Review| *current = review.clone())
            .await
    }

    async fn delete_review(&self, id: Uuid) -> Result<()> {
        self.remove(EntityKey::new(EntityType::Review, id)).await
    }
}

#[async_trait]
impl<T: ItemTable + 'static> RecordReplay for KeyValueStore<T> {
    async fn put_record_unless_newer(&self, record: &DomainRecord) -> Result<bool> {
        self.put_unless_newer(record).await
    }
}
