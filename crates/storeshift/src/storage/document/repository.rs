//! MongoDB implementation of the repository traits.

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use uuid::Uuid;

use storeshift_core::model::{
    DomainRecord, EntityType, Order, PasswordReset, Product, Review, Timestamp, User,
};
use storeshift_core::storage::{
    OrderFilter, OrderRepository, ProductFilter, ProductRepository, RecordReplay,
    RepositoryError, Result, ReviewFilter, ReviewRepository, UserFilter, UserRepository,
};

use super::conversions::{
    document_to_order, document_to_product, document_to_review, document_to_user, id_filter,
    mark_paid_update, not_newer_filter, order_filter, order_to_document, password_update,
    product_filter, product_to_document, reset_token_update, review_filter, review_to_document,
    user_filter, user_to_document, ORDERS, PRODUCTS, REVIEWS, USERS,
};
use super::error::{map_error, map_write_error};

/// MongoDB document store, one collection per entity type.
#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    database: Database,
    users: Collection<Document>,
    products: Collection<Document>,
    orders: Collection<Document>,
    reviews: Collection<Document>,
}

impl MongoDocumentStore {
    /// Connects to MongoDB and ensures the collection indexes exist.
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await.map_err(map_error)?;
        let store = Self::new(&client, database_name);
        store.init().await?;

        tracing::info!(database = %database_name, "Connected to MongoDB");
        Ok(store)
    }

    /// Wraps an existing client without touching the server.
    pub fn new(client: &Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self {
            users: database.collection(USERS),
            products: database.collection(PRODUCTS),
            orders: database.collection(ORDERS),
            reviews: database.collection(REVIEWS),
            database,
        }
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Creates the unique and lookup indexes.
    pub async fn init(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(map_error)?;
        self.users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "resetPasswordToken": 1 })
                    .options(IndexOptions::builder().sparse(true).build())
                    .build(),
            )
            .await
            .map_err(map_error)?;
        self.orders
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "orderCode": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(map_error)?;

        let lookups = [
            (&self.products, doc! { "category": 1 }),
            (&self.orders, doc! { "userId": 1 }),
            (&self.reviews, doc! { "productId": 1 }),
            (&self.reviews, doc! { "userId": 1 }),
        ];
        for (collection, keys) in lookups {
            collection
                .create_index(IndexModel::builder().keys(keys).build())
                .await
                .map_err(map_error)?;
        }
        Ok(())
    }

    async fn find_one<T>(
        collection: &Collection<Document>,
        filter: Document,
        decode: fn(&Document) -> Result<T>,
    ) -> Result<Option<T>> {
        let document = collection.find_one(filter).await.map_err(map_error)?;
        document.as_ref().map(decode).transpose()
    }

    async fn find_all<T>(
        collection: &Collection<Document>,
        filter: Document,
        decode: fn(&Document) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut cursor = collection.find(filter).await.map_err(map_error)?;
        let mut results = Vec::new();
        while cursor.advance().await.map_err(map_error)? {
            let document = cursor.deserialize_current().map_err(map_error)?;
            results.push(decode(&document)?);
        }
        Ok(results)
    }

    async fn count(collection: &Collection<Document>, filter: Document) -> Result<u64> {
        collection.count_documents(filter).await.map_err(map_error)
    }

    async fn replace(
        collection: &Collection<Document>,
        entity_type: EntityType,
        id: Uuid,
        document: Document,
        unique_keys: &[(&str, String)],
    ) -> Result<()> {
        let result = collection
            .replace_one(id_filter(id), document)
            .await
            .map_err(|e| map_write_error(e, entity_type, unique_keys))?;
        if result.matched_count == 0 {
            return Err(RepositoryError::not_found(entity_type, id));
        }
        Ok(())
    }

    async fn delete(collection: &Collection<Document>, id: Uuid) -> Result<()> {
        collection
            .delete_one(id_filter(id))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn update_fields(&self, id: Uuid, update: Document) -> Result<()> {
        let result = self
            .users
            .update_one(id_filter(id), update)
            .await
            .map_err(map_error)?;
        if result.matched_count == 0 {
            return Err(RepositoryError::not_found(EntityType::User, id));
        }
        Ok(())
    }
}

fn user_keys(user: &User) -> [(&'static str, String); 2] {
    [("_id", user.id.to_string()), ("email", user.email.clone())]
}

fn order_keys(order: &Order) -> [(&'static str, String); 2] {
    [
        ("_id", order.id.to_string()),
        ("orderCode", order.order_code.to_string()),
    ]
}

// ============================================================================
// UserRepository
// ============================================================================

#[async_trait]
impl UserRepository for MongoDocumentStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Self::find_one(&self.users, id_filter(id), document_to_user).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Self::find_one(&self.users, doc! { "email": email }, document_to_user).await
    }

    async fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        Self::find_one(
            &self.users,
            doc! { "resetPasswordToken": token },
            document_to_user,
        )
        .await
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        Self::find_all(&self.users, user_filter(filter), document_to_user).await
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        Self::count(&self.users, user_filter(filter)).await
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.users
            .insert_one(user_to_document(user))
            .await
            .map_err(|e| map_write_error(e, EntityType::User, &user_keys(user)))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        Self::replace(
            &self.users,
            EntityType::User,
            user.id,
            user_to_document(user),
            &user_keys(user)[1..],
        )
        .await
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        Self::delete(&self.users, id).await
    }

    async fn update_user_password(
        &self,
        id: Uuid,
        password_hash: &str,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.update_fields(id, password_update(password_hash, updated_at))
            .await
    }

    async fn set_user_reset_token(
        &self,
        id: Uuid,
        reset: Option<&PasswordReset>,
        updated_at: Timestamp,
    ) -> Result<()> {
        self.update_fields(id, reset_token_update(reset, updated_at))
            .await
    }
}

// ============================================================================
// ProductRepository
// ============================================================================

#[async_trait]
impl ProductRepository for MongoDocumentStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Self::find_one(&self.products, id_filter(id), document_to_product).await
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        Self::find_all(&self.products, product_filter(filter), document_to_product).await
    }

    async fn count_products(&self, filter: &ProductFilter) -> Result<u64> {
        Self::count(&self.products, product_filter(filter)).await
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        self.products
            .insert_one(product_to_document(product))
            .await
            .map_err(|e| {
                map_write_error(e, EntityType::Product, &[("_id", product.id.to_string())])
            })?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        Self::replace(
            &self.products,
            EntityType::Product,
            product.id,
            product_to_document(product),
            &[],
        )
        .await
    }

    async fn delete_product(&self, id: Uuid) -> Result<()> {
        Self::delete(&self.products, id).await
    }
}

// ============================================================================
// OrderRepository
// ============================================================================

#[async_trait]
impl OrderRepository for MongoDocumentStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Self::find_one(&self.orders, id_filter(id), document_to_order).await
    }

    async fn get_order_by_code(&self, order_code: i64) -> Result<Option<Order>> {
        Self::find_one(
            &self.orders,
            doc! { "orderCode": order_code },
            document_to_order,
        )
        .await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        Self::find_all(&self.orders, order_filter(filter), document_to_order).await
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<u64> {
        Self::count(&self.orders, order_filter(filter)).await
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        self.orders
            .insert_one(order_to_document(order))
            .await
            .map_err(|e| map_write_error(e, EntityType::Order, &order_keys(order)))?;
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        Self::replace(
            &self.orders,
            EntityType::Order,
            order.id,
            order_to_document(order),
            &order_keys(order)[1..],
        )
        .await
    }

    async fn mark_order_paid(
        &self,
        id: Uuid,
        paid_at: Timestamp,
        updated_at: Timestamp,
    ) -> Result<Option<Order>> {
        let (filter, update) = mark_paid_update(id, paid_at, updated_at);
        let paid = self
            .orders
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_error)?;
        match paid {
            Some(document) => document_to_order(&document).map(Some),
            None => self.get_order(id).await,
        }
    }

    async fn delete_order(&self, id: Uuid) -> Result<()> {
        Self::delete(&self.orders, id).await
    }
}

// ============================================================================
// ReviewRepository
// ============================================================================

#[async_trait]
impl ReviewRepository for MongoDocumentStore {
    async fn get_review(&self, id: Uuid) -> Result<Option<Review>> {
        Self::find_one(&self.reviews, id_filter(id), document_to_review).await
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> Result<Vec<Review>> {
        Self::find_all(&self.reviews, review_filter(filter), document_to_review).await
    }

    async fn count_reviews(&self, filter: &ReviewFilter) -> Result<u64> {
        Self::count(&self.reviews, review_filter(filter)).await
    }

    async fn create_review(&self, review: &Review) -> Result<()> {
        self.reviews
            .insert_one(review_to_document(review))
            .await
            .map_err(|e| {
                map_write_error(e, EntityType::Review, &[("_id", review.id.to_string())])
            })?;
        Ok(())
    }

    async fn update_review(&self, review: &Review) -> Result<()> {
        Self::replace(
            &self.reviews,
            EntityType::Review,
            review.id,
            review_to_document(review),
            &[],
        )
        .await
    }

    async fn delete_review(&self, id: Uuid) -> Result<()> {
        Self::delete(&self.reviews, id).await
    }
}

// ============================================================================
// RecordReplay
// ============================================================================

#[async_trait]
impl RecordReplay for MongoDocumentStore {
    async fn put_record_unless_newer(&self, record: &DomainRecord) -> Result<bool> {
        let (collection, document, unique_keys) = match record {
            DomainRecord::User(user) => {
                (&self.users, user_to_document(user), user_keys(user).to_vec())
            }
            DomainRecord::Product(product) => (
                &self.products,
                product_to_document(product),
                vec![("_id", product.id.to_string())],
            ),
            DomainRecord::Order(order) => {
                (&self.orders, order_to_document(order), order_keys(order).to_vec())
            }
            DomainRecord::Review(review) => (
                &self.reviews,
                review_to_document(review),
                vec![("_id", review.id.to_string())],
            ),
        };
        let entity_type = record.entity_type();

        let replaced = collection
            .replace_one(
                not_newer_filter(record.id(), record.updated_at()),
                document.clone(),
            )
            .await
            .map_err(|e| map_write_error(e, entity_type, &unique_keys[1..]))?;
        if replaced.matched_count > 0 {
            return Ok(true);
        }
        if collection
            .find_one(id_filter(record.id()))
            .await
            .map_err(map_error)?
            .is_some()
        {
            return Ok(false);
        }
        collection
            .insert_one(document)
            .await
            .map_err(|e| map_write_error(e, entity_type, &unique_keys))?;
        Ok(true)
    }
}
