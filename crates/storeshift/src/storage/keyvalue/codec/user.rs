use storeshift_core::model::{EntityType, PasswordReset, User};
use storeshift_core::storage::{RepositoryError, Result};

use super::attributes::{self as attr, Item};
use super::ProjectionKey;
use crate::storage::keyvalue::keys;

const ENTITY: EntityType = EntityType::User;

pub(super) fn encode(user: &User) -> Result<(Item, Vec<ProjectionKey>)> {
    attr::require_key_part(ENTITY, "email", &user.email)?;

    let mut item = Item::new();
    attr::put_string(&mut item, "id", user.id.to_string());
    attr::put_string(&mut item, "name", user.name.as_str());
    attr::put_string(&mut item, "email", user.email.as_str());
    attr::put_string(&mut item, "password", user.password.as_str());
    attr::put_string(&mut item, "role", user.role.as_str());
    attr::put_timestamp(&mut item, "createdAt", user.created_at);
    attr::put_timestamp(&mut item, "updatedAt", user.updated_at);

    let mut projections = vec![ProjectionKey::unique(keys::email_pk(&user.email))];

    if let Some(reset) = &user.reset_password {
        attr::require_key_part(ENTITY, "resetPasswordToken", &reset.token)?;
        attr::put_string(&mut item, "resetPasswordToken", reset.token.as_str());
        attr::put_timestamp(&mut item, "resetPasswordExpiresAt", reset.expires_at);
        projections.push(ProjectionKey::shared(keys::reset_token_pk(&reset.token)));
    }

    Ok((item, projections))
}

pub(super) fn decode(item: &Item) -> Result<User> {
    let reset_password = match attr::get_optional_string(item, "resetPasswordToken") {
        Some(token) => Some(PasswordReset {
            token,
            expires_at: attr::get_timestamp(item, ENTITY, "resetPasswordExpiresAt")?,
        }),
        None => None,
    };

    Ok(User {
        id: attr::get_uuid(item, ENTITY, "id")?,
        name: attr::get_string(item, ENTITY, "name")?,
        email: attr::get_string(item, ENTITY, "email")?,
        password: attr::get_string(item, ENTITY, "password")?,
        role: attr::get_string(item, ENTITY, "role")?
            .parse()
            .map_err(|e: RepositoryError| RepositoryError::encoding(ENTITY, e.to_string()))?,
        reset_password,
        created_at: attr::get_timestamp(item, ENTITY, "createdAt")?,
        updated_at: attr::get_timestamp(item, ENTITY, "updatedAt")?,
    })
}
