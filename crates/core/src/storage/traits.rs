use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{DomainRecord, Order, PasswordReset, Product, Review, Timestamp, User};

use super::{OrderFilter, ProductFilter, Result, ReviewFilter, UserFilter};

/// Repository for user operations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Gets a user by their ID.
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Gets a user by their email address.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Gets the user holding the given password reset token, expired or not.
    async fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>>;

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>>;

    async fn count_users(&self, filter: &UserFilter) -> Result<u64>;

    /// Creates a new user. Fails with `DuplicateKey` if the id or email is taken.
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Replaces an existing user. Fails with `NotFound` if the id is absent.
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Deletes a user. Deleting an absent user succeeds.
    async fn delete_user(&self, id: Uuid) -> Result<()>;

    /// Replaces the password hash in a single atomic write.
    async fn update_user_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: Timestamp,
    ) -> Result<()>;

    /// Sets or clears the password reset token in a single atomic write.
    async fn set_user_reset_token(
        &self,
        id: Uuid,
        reset: Option<&PasswordReset>,
        updated_at: Timestamp,
    ) -> Result<()>;
}

/// Repository for product operations.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>>;

    async fn count_products(&self, filter: &ProductFilter) -> Result<u64>;

    async fn create_product(&self, product: &Product) -> Result<()>;

    async fn update_product(&self, product: &Product) -> Result<()>;

    async fn delete_product(&self, id: Uuid) -> Result<()>;
}

/// Repository for order operations.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    /// Gets an order by its unique payment order code.
    async fn get_order_by_code(&self, order_code: i64) -> Result<Option<Order>>;

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    async fn count_orders(&self, filter: &OrderFilter) -> Result<u64>;

    /// Creates a new order. Fails with `DuplicateKey` if the id or order code is taken.
    async fn create_order(&self, order: &Order) -> Result<()>;

    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Sets `paidAt` unless the order is already paid, as one atomic write.
    /// Returns the stored order, or `None` if the id is absent.
    async fn mark_order_paid(
        &self,
        id: Uuid,
        paid_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Option<Order>>;

    async fn delete_order(&self, id: Uuid) -> Result<()>;
}

/// Repository for review operations.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn get_review(&self, id: Uuid) -> Result<Option<Review>>;

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>>;

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<u64>;

    async fn create_review(&self, review: &Review) -> Result<()>;

    async fn update_review(&self, review: &Review) -> Result<()>;

    async fn delete_review(&self, id: Uuid) -> Result<()>;
}

/// Version-guarded writes of whole records, used to replay shadow writes.
#[async_trait]
pub trait RecordReplay: Send + Sync {
    /// Creates or replaces `record` unless the stored copy carries a later
    /// `updatedAt`. Returns `false` when the stored copy was kept.
    async fn put_record_unless_newer(&self, record: &DomainRecord) -> Result<bool>;
}

/// A backend driver implementing every entity contract.
///
/// Blanket-implemented so drivers only implement the repository traits.
pub trait Store:
    UserRepository + ProductRepository + OrderRepository + ReviewRepository + RecordReplay
{
}

impl<T> Store for T where
    T: UserRepository + ProductRepository + OrderRepository + ReviewRepository + RecordReplay
{
}
