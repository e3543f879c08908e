use std::sync::Arc;

use uuid::Uuid;

use storeshift_core::migration::{Mutation, Operation};
use storeshift_core::model::{Entity, EntityKey, EntityType, Product, Timestamp};
use storeshift_core::storage::{ProductFilter, ProductRepository, Result};

use crate::migration::{MigrationRouter, ShadowPlan};

/// Product repository facade.
#[derive(Clone)]
pub struct Products {
    router: Arc<MigrationRouter>,
}

impl Products {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self { router }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        self.router
            .read(|store| async move { store.get_product(id).await })
            .await
    }

    pub async fn find_all(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        self.router
            .read(|store| async move { store.list_products(filter).await })
            .await
    }

    pub async fn count(&self, filter: &ProductFilter) -> Result<u64> {
        self.router
            .read(|store| async move { store.count_products(filter).await })
            .await
    }

    pub async fn create(&self, product: &Product) -> Result<()> {
        let mutation = Mutation::Create(product.clone().into_record());
        self.router
            .write(
                product.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(mutation),
                |store| async move { store.create_product(product).await },
            )
            .await
    }

    /// Replaces the product with `updatedAt` stamped now. Returns what was stored.
    pub async fn update(&self, product: &Product) -> Result<Product> {
        let mut stamped = product.clone();
        stamped.updated_at = Timestamp::now_monotonic();
        let mutation = Mutation::Update(stamped.clone().into_record());
        let stored = &stamped;
        self.router
            .write(
                stamped.entity_key(),
                Operation::Update,
                ShadowPlan::Replay(mutation),
                |store| async move { store.update_product(stored).await },
            )
            .await?;
        Ok(stamped)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.router
            .write(
                EntityKey::new(EntityType::Product, id),
                Operation::Delete,
                ShadowPlan::Replay(Mutation::Delete),
                |store| async move { store.delete_product(id).await },
            )
            .await
    }
}
