//! Entity-agnostic access to a [`Store`].
//!
//! Replication and verification work on [`DomainRecord`]s keyed by
//! [`EntityKey`]. These helpers dispatch to the per-entity trait methods.

use crate::model::{DomainRecord, EntityKey, EntityType};

use super::{
    OrderFilter, OrderRepository, ProductFilter, ProductRepository, Result, ReviewFilter,
    ReviewRepository, Store, UserFilter, UserRepository,
};

/// Fetches one record by key.
pub async fn fetch_record(store: &dyn Store, key: EntityKey) -> Result<Option<DomainRecord>> {
    Ok(match key.entity_type {
        EntityType::User => store.get_user(key.id).await?.map(DomainRecord::User),
        EntityType::Product => store.get_product(key.id).await?.map(DomainRecord::Product),
        EntityType::Order => store.get_order(key.id).await?.map(DomainRecord::Order),
        EntityType::Review => store.get_review(key.id).await?.map(DomainRecord::Review),
    })
}

/// Lists every record of one entity type.
pub async fn list_records(store: &dyn Store, entity: EntityType) -> Result<Vec<DomainRecord>> {
    Ok(match entity {
        EntityType::User => into_records(store.list_users(&UserFilter::default()).await?),
        EntityType::Product => {
            into_records(store.list_products(&ProductFilter::default()).await?)
        }
        EntityType::Order => into_records(store.list_orders(&OrderFilter::default()).await?),
        EntityType::Review => into_records(store.list_reviews(&ReviewFilter::default()).await?),
    })
}

pub async fn create_record(store: &dyn Store, record: &DomainRecord) -> Result<()> {
    match record {
        DomainRecord::User(user) => store.create_user(user).await,
        DomainRecord::Product(product) => store.create_product(product).await,
        DomainRecord::Order(order) => store.create_order(order).await,
        DomainRecord::Review(review) => store.create_review(review).await,
    }
}

pub async fn update_record(store: &dyn Store, record: &DomainRecord) -> Result<()> {
    match record {
        DomainRecord::User(user) => store.update_user(user).await,
        DomainRecord::Product(product) => store.update_product(product).await,
        DomainRecord::Order(order) => store.update_order(order).await,
        DomainRecord::Review(review) => store.update_review(review).await,
    }
}

pub async fn delete_record(store: &dyn Store, key: EntityKey) -> Result<()> {
    match key.entity_type {
        EntityType::User => store.delete_user(key.id).await,
        EntityType::Product => store.delete_product(key.id).await,
        EntityType::Order => store.delete_order(key.id).await,
        EntityType::Review => store.delete_review(key.id).await,
    }
}

fn into_records<T: Into<DomainRecord>>(items: Vec<T>) -> Vec<DomainRecord> {
    items.into_iter().map(Into::into).collect()
}
