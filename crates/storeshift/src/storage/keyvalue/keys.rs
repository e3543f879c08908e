//! Key generation for the single-table layout.
//!
//! Pure functions for building partition and sort keys. Every primary item
//! uses the same value for `PK` and `SK`; projection items live under an
//! alternate partition and reuse the owner's primary key as their sort key.

use storeshift_core::model::{EntityKey, EntityType};
use uuid::Uuid;

// ============================================================================
// Attribute names
// ============================================================================

pub const PK: &str = "PK";
pub const SK: &str = "SK";
pub const ENTITY_TYPE: &str = "EntityType";
pub const GSI1_PK: &str = "GSI1PK";
pub const GSI1_SK: &str = "GSI1SK";

/// Index over primary items keyed by entity type.
pub const TYPE_INDEX: &str = "GSI1";

// ============================================================================
// Key prefixes
// ============================================================================

pub const USER_PREFIX: &str = "USER#";
pub const PRODUCT_PREFIX: &str = "PRODUCT#";
pub const ORDER_PREFIX: &str = "ORDER#";
pub const REVIEW_PREFIX: &str = "REVIEW#";
pub const EMAIL_PREFIX: &str = "EMAIL#";
pub const RESET_PREFIX: &str = "RESET#";
pub const CATEGORY_PREFIX: &str = "CATEGORY#";
pub const ORDER_CODE_PREFIX: &str = "ORDERCODE#";

// ============================================================================
// Primary keys
// ============================================================================

/// Pattern: `USER#<user_id>`
pub fn user_pk(user_id: Uuid) -> String {
    format!("{USER_PREFIX}{user_id}")
}

/// Pattern: `PRODUCT#<product_id>`
pub fn product_pk(product_id: Uuid) -> String {
    format!("{PRODUCT_PREFIX}{product_id}")
}

/// Pattern: `ORDER#<order_id>`
pub fn order_pk(order_id: Uuid) -> String {
    format!("{ORDER_PREFIX}{order_id}")
}

/// Pattern: `REVIEW#<review_id>`
pub fn review_pk(review_id: Uuid) -> String {
    format!("{REVIEW_PREFIX}{review_id}")
}

/// Primary key of any entity.
pub fn primary_key(key: EntityKey) -> String {
    match key.entity_type {
        EntityType::User => user_pk(key.id),
        EntityType::Product => product_pk(key.id),
        EntityType::Order => order_pk(key.id),
        EntityType::Review => review_pk(key.id),
    }
}

/// Sort key prefix shared by every item owned by an entity type.
pub fn entity_prefix(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::User => USER_PREFIX,
        EntityType::Product => PRODUCT_PREFIX,
        EntityType::Order => ORDER_PREFIX,
        EntityType::Review => REVIEW_PREFIX,
    }
}

// ============================================================================
// Projection partitions
// ============================================================================

/// Pattern: `EMAIL#<email>`
pub fn email_pk(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

/// Pattern: `RESET#<token>`
pub fn reset_token_pk(token: &str) -> String {
    format!("{RESET_PREFIX}{token}")
}

/// Pattern: `CATEGORY#<category>`
pub fn category_pk(category: &str) -> String {
    format!("{CATEGORY_PREFIX}{category}")
}

/// Pattern: `ORDERCODE#<order_code>`
pub fn order_code_pk(order_code: i64) -> String {
    format!("{ORDER_CODE_PREFIX}{order_code}")
}
