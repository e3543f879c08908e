use std::sync::Arc;

use uuid::Uuid;

use storeshift_core::migration::{Mutation, Operation};
use storeshift_core::model::{Entity, EntityKey, EntityType, PasswordReset, Timestamp, User};
use storeshift_core::storage::{Result, UserFilter, UserRepository};

use crate::migration::{MigrationRouter, ShadowPlan};

/// User repository facade.
#[derive(Clone)]
pub struct Users {
    router: Arc<MigrationRouter>,
}

impl Users {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self { router }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.router
            .read(|store| async move { store.get_user(id).await })
            .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.router
            .read(|store| async move { store.get_user_by_email(email).await })
            .await
    }

    /// Finds the user holding `token`. An expired token finds nobody.
    pub async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        let user = self
            .router
            .read(|store| async move { store.get_user_by_reset_token(token).await })
            .await?;
        let now = Timestamp::now();
        Ok(user.filter(|user| {
            user.reset_password
                .as_ref()
                .is_some_and(|reset| !reset.is_expired(now))
        }))
    }

    pub async fn find_all(&self, filter: &UserFilter) -> Result<Vec<User>> {
        self.router
            .read(|store| async move { store.list_users(filter).await })
            .await
    }

    pub async fn count(&self, filter: &UserFilter) -> Result<u64> {
        self.router
            .read(|store| async move { store.count_users(filter).await })
            .await
    }

    pub async fn create(&self, user: &User) -> Result<()> {
        let mutation = Mutation::Create(user.clone().into_record());
        self.router
            .write(
                user.entity_key(),
                Operation::Create,
                ShadowPlan::Replay(mutation),
                |store| async move { store.create_user(user).await },
            )
            .await
    }

    /// Replaces the user with `updatedAt` stamped now. Returns what was stored.
    pub async fn update(&self, user: &User) -> Result<User> {
        let mut stamped = user.clone();
        stamped.updated_at = Timestamp::now_monotonic();
        let mutation = Mutation::Update(stamped.clone().into_record());
        let stored = &stamped;
        self.router
            .write(
                stamped.entity_key(),
                Operation::Update,
                ShadowPlan::Replay(mutation),
                |store| async move { store.update_user(stored).await },
            )
            .await?;
        Ok(stamped)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.router
            .write(
                key(id),
                Operation::Delete,
                ShadowPlan::Replay(Mutation::Delete),
                |store| async move { store.delete_user(id).await },
            )
            .await
    }

    /// Replaces the password hash in one atomic store write. Readers see
    /// either the old hash or the new one, never a partial record.
    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let now = Timestamp::now_monotonic();
        self.router
            .write(
                key(id),
                Operation::UpdatePassword,
                ShadowPlan::ReadBack,
                |store| async move { store.update_user_password(id, password_hash, now).await },
            )
            .await
    }

    pub async fn set_reset_password_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: Timestamp,
    ) -> Result<()> {
        let reset = PasswordReset {
            token: token.to_string(),
            expires_at,
        };
        self.write_reset_token(id, Some(reset)).await
    }

    pub async fn clear_reset_password_token(&self, id: Uuid) -> Result<()> {
        self.write_reset_token(id, None).await
    }

    async fn write_reset_token(&self, id: Uuid, reset: Option<PasswordReset>) -> Result<()> {
        let now = Timestamp::now_monotonic();
        self.router
            .write(
                key(id),
                Operation::SetResetPasswordToken,
                ShadowPlan::ReadBack,
                |store| async move { store.set_user_reset_token(id, reset.as_ref(), now).await },
            )
            .await
    }
}

fn key(id: Uuid) -> EntityKey {
    EntityKey::new(EntityType::User, id)
}
