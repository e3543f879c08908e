use std::sync::Arc;

use uuid::Uuid;

use storeshift_core::migration::{Mutation, Operation};
use storeshift_core::model::{Entity, EntityKey, EntityType, Order, Timestamp};
use storeshift_core::storage::{OrderFilter, OrderRepository, RepositoryError, Result};

use crate::migration::{MigrationRouter, ShadowPlan};

/// Order repository facade.
#[derive(Clone)]
pub struct Orders {
    router: Arc<MigrationRouter>,
}

impl Orders {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self { router }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.router
            .read(|store| async move { store.get_order(id).await })
            .await
    }

    /// Looks an order up by the code the payment provider echoes back.
    pub async fn find_by_order_code(&self, order_code: i64) -> Result<Option<Order>> {
        self.router
            .read(|store| async move { store.get_order_by_code(order_code).await })
            .await
    }

    pub async fn find_all(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.router
            .read(|store| async move { store.list_orders(filter).await })
            .await
    }

    pub async fn count(&self, filter: &OrderFilter) -> Result<u64> {
        self.router
            .read(|store| async move { store.count_orders(filter).await })
            .await
    }

    pub async fn create(&self, order: &Order) -> Result<()> {
        let mutation = Mutation::Create(order.clone().into_record());
        self.router
            .write(
                order.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(mutation),
                |store| async move { store.create_order(order).await },
            )
            .await
    }

    /// Replaces the order with `updatedAt` stamped now. Returns what was stored.
    pub async fn update(&self, order: &Order) -> Result<Order> {
        let mut stamped = order.clone();
        stamped.updated_at = Timestamp::now_monotonic();
        let mutation = Mutation::Update(stamped.clone().into_record());
        let stored = &stamped;
        self.router
            .write(
                stamped.entity_key(),
                Operation::Update,
                ShadowPlan::Replay(mutation),
                |store| async move { store.update_order(stored).await },
            )
            .await?;
        Ok(stamped)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.router
            .write(
                EntityKey::new(EntityType::Order, id),
                Operation::Delete,
                ShadowPlan::Replay(Mutation::Delete),
                |store| async move { store.delete_order(id).await },
            )
            .await
    }

    /// Records a payment in one atomic store write. Marking an already paid
    /// order keeps the first payment time and succeeds.
    pub async fn mark_paid(&self, id: Uuid, paid_at: Timestamp) -> Result<Order> {
        let updated_at = Timestamp::now_monotonic();
        let order = self
            .router
            .write(
                EntityKey::new(EntityType::Order, id),
                Operation::MarkPaid,
                ShadowPlan::ReadBack,
                |store| async move { store.mark_order_paid(id, paid_at, updated_at).await },
            )
            .await?
            .ok_or_else(|| RepositoryError::not_found(EntityType::Order, id))?;

        tracing::info!(order_id = %id, order_code = order.order_code, "Order marked paid");
        Ok(order)
    }
}
