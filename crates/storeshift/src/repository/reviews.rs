use std::sync::Arc;

use uuid::Uuid;

use storeshift_core::migration::{Mutation, Operation};
use storeshift_core::model::{Entity, EntityKey, EntityType, Review, Timestamp};
use storeshift_core::storage::{Result, ReviewFilter, ReviewRepository};

use crate::migration::{MigrationRouter, ShadowPlan};

/// Review repository facade. Ratings are validated before any store is called.
#[derive(Clone)]
pub struct Reviews {
    router: Arc<MigrationRouter>,
}

impl Reviews {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self { router }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Review>> {
        self.router
            .read(|store| async move { store.get_review(id).await })
            .await
    }

    pub async fn find_all(&self, filter: &ReviewFilter) -> Result<Vec<Review>> {
        self.router
            .read(|store| async move { store.list_reviews(filter).await })
            .await
    }

    pub async fn count(&self, filter: &ReviewFilter) -> Result<u64> {
        self.router
            .read(|store| async move { store.count_reviews(filter).await })
            .await
    }

    pub async fn create(&self, review: &Review) -> Result<()> {
        review.validate()?;
        let mutation = Mutation::Create(review.clone().into_record());
        self.router
            .write(
                review.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(mutation),
                |store| async move { store.create_review(review).await },
            )
            .await
    }

    /// Replaces the review with `updatedAt` stamped now. Returns what was stored.
    pub async fn update(&self, review: &Review) -> Result<Review> {
        review.validate()?;
        let mut stamped = review.clone();
        stamped.updated_at = Timestamp::now_monotonic();
        let mutation = Mutation::Update(stamped.clone().into_record());
        let stored = &stamped;
        self.router
            .write(
                stamped.entity_key(),
                Operation::Update,
                ShadowPlan::Replay(mutation),
                |store| async move { store.update_review(stored).await },
            )
            .await?;
        Ok(stamped)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.router
            .write(
                EntityKey::new(EntityType::Review, id),
                Operation::Delete,
                ShadowPlan::Replay(Mutation::Delete),
                |store| async move { store.delete_review(id).await },
            )
            .await
    }
}
