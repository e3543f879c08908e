//! In-memory document store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use storeshift_core::model::{
    DomainRecord, Entity, EntityType, Order, PasswordReset, Product, Review, Timestamp, User,
};
use storeshift_core::storage::{
    OrderFilter, OrderRepository, ProductFilter, ProductRepository, RecordReplay,
    RepositoryError, Result, ReviewFilter, ReviewRepository, UserFilter, UserRepository,
};

/// In-memory document storage for testing and local runs.
///
/// Enforces the same uniqueness rules as the MongoDB driver: ids, user
/// emails and order codes. Every call bumps a counter, and `set_offline`
/// makes every call fail with `BackendUnavailable`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    products: Arc<RwLock<HashMap<Uuid, Product>>>,
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    reviews: Arc<RwLock<HashMap<Uuid, Review>>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of repository calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::BackendUnavailable(
                "in-memory document store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn duplicate(entity_type: EntityType, key: impl ToString) -> RepositoryError {
    RepositoryError::DuplicateKey {
        entity_type,
        key: key.to_string(),
    }
}

fn keep_newer<E: Entity>(
    map: &mut HashMap<Uuid, E>,
    record: E,
    updated_at: impl Fn(&E) -> Timestamp,
) -> bool {
    let id = record.entity_id();
    if map
        .get(&id)
        .is_some_and(|stored| updated_at(stored) > updated_at(&record))
    {
        return false;
    }
    map.insert(id, record);
    true
}

#[async_trait]
impl UserRepository for InMemoryDocumentStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.enter()?;
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.enter()?;
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        self.enter()?;
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.reset_password.as_ref().is_some_and(|r| r.token == token))
            .cloned())
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        self.enter()?;
        let users = self.users.read().await;
        Ok(users.values().filter(|u| filter.matches(u)).cloned().collect())
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        self.enter()?;
        let users = self.users.read().await;
        Ok(users.values().filter(|u| filter.matches(u)).count() as u64)
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.enter()?;
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(duplicate(EntityType::User, user.id));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(duplicate(EntityType::User, &user.email));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.enter()?;
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(RepositoryError::not_found(EntityType::User, user.id));
        }
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(duplicate(EntityType::User, &user.email));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        self.enter()?;
        self.users.write().await.remove(&id);
        Ok(())
    }

    async fn update_user_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.enter()?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(EntityType::User, id))?;
        user.password = password_hash.to_string();
        user.updated_at = updated_at;
        Ok(())
    }

    async fn set_user_reset_token(
        &self,
        id: Uuid,
        reset: Option<&PasswordReset>,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.enter()?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(EntityType::User, id))?;
        user.reset_password = reset.cloned();
        user.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for InMemoryDocumentStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        self.enter()?;
        let products = self.products.read().await;
        Ok(products.get(&id).cloned())
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        self.enter()?;
        let products = self.products.read().await;
        Ok(products
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn count_products(&self, filter: &ProductFilter) -> Result<u64> {
        self.enter()?;
        let products = self.products.read().await;
        Ok(products.values().filter(|p| filter.matches(p)).count() as u64)
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        self.enter()?;
        let mut products = self.products.write().await;
        if products.contains_key(&product.id) {
            return Err(duplicate(EntityType::Product, product.id));
        }
        products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        self.enter()?;
        let mut products = self.products.write().await;
        if !products.contains_key(&product.id) {
            return Err(RepositoryError::not_found(EntityType::Product, product.id));
        }
        products.insert(product.id, product.clone());
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<()> {
        self.enter()?;
        self.products.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryDocumentStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        self.enter()?;
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn get_order_by_code(&self, order_code: i64) -> Result<Option<Order>> {
        self.enter()?;
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| o.order_code == order_code)
            .cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.enter()?;
        let orders = self.orders.read().await;
        Ok(orders.values().filter(|o| filter.matches(o)).cloned().collect())
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<u64> {
        self.enter()?;
        let orders = self.orders.read().await;
        Ok(orders.values().filter(|o| filter.matches(o)).count() as u64)
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        self.enter()?;
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(duplicate(EntityType::Order, order.id));
        }
        if orders.values().any(|o| o.order_code == order.order_code) {
            return Err(duplicate(EntityType::Order, order.order_code));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.enter()?;
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.id) {
            return Err(RepositoryError::not_found(EntityType::Order, order.id));
        }
        if orders
            .values()
            .any(|o| o.id != order.id && o.order_code == order.order_code)
        {
            return Err(duplicate(EntityType::Order, order.order_code));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn mark_order_paid(
        &self,
        id: Uuid,
        paid_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Option<Order>> {
        self.enter()?;
        let mut orders = self.orders.write().await;
        Ok(orders.get_mut(&id).map(|order| {
            if !order.is_paid() {
                order.paid_at = Some(paid_at);
                order.updated_at = updated_at;
            }
            order.clone()
        }))
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        self.enter()?;
        self.orders.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ReviewRepository for InMemoryDocumentStore {
    async fn get_review(&self, id: Uuid) -> Result<Option<Review>> {
        self.enter()?;
        let reviews = self.reviews.read().await;
        Ok(reviews.get(&id).cloned())
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>> {
        self.enter()?;
        let reviews = self.reviews.read().await;
        Ok(reviews
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<u64> {
        self.enter()?;
        let reviews = self.reviews.read().await;
        Ok(reviews.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn create_review(&self, review: &Review) -> Result<()> {
        self.enter()?;
        let mut reviews = self.reviews.write().await;
        if reviews.contains_key(&review.id) {
            return Err(duplicate(EntityType::Review, review.id));
        }
        reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn update_review(&self, review: &Review) -> Result<()> {
        self.enter()?;
        let mut reviews = self.reviews.write().await;
        if !reviews.contains_key(&review.id) {
            return Err(RepositoryError::not_found(EntityType::Review, review.id));
        }
        reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn delete_review(&self, id: Uuid) -> Result<()> {
        self.enter()?;
        self.reviews.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl RecordReplay for InMemoryDocumentStore {
    async fn put_record_unless_newer(&self, record: &DomainRecord) -> Result<bool> {
        self.enter()?;
        match record.clone() {
            DomainRecord::User(user) => {
                let mut users = self.users.write().await;
                if users
                    .values()
                    .any(|u| u.id != user.id && u.email == user.email)
                {
                    return Err(duplicate(EntityType::User, &user.email));
                }
                Ok(keep_newer(&mut users, user, |u| u.updated_at))
            }
            DomainRecord::Product(product) => {
                let mut products = self.products.write().await;
                Ok(keep_newer(&mut products, product, |p| p.updated_at))
            }
            DomainRecord::Order(order) => {
                let mut orders = self.orders.write().await;
                if orders
                    .values()
                    .any(|o| o.id != order.id && o.order_code == order.order_code)
                {
                    return Err(duplicate(EntityType::Order, order.order_code));
                }
                Ok(keep_newer(&mut orders, order, |o| o.updated_at))
            }
            DomainRecord::Review(review) => {
                let mut reviews = self.reviews.write().await;
                Ok(keep_newer(&mut reviews, review, |r| r.updated_at))
            }
        }
    }
}
