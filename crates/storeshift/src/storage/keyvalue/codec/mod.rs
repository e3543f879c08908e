//! Item codec: domain records to single-table items and back.
//!
//! Each record encodes to one primary item plus zero or more projection
//! items. Every item carries the full attribute set and the `EntityType`
//! discriminator, so any of them decodes back to the same record. Only the
//! primary item carries the type index keys.
//!
//! Per-entity logic lives in its own module; this module only assembles keys
//! and dispatches on the discriminator.

mod attributes;
mod order;
mod product;
mod review;
mod user;

pub use attributes::Item;

use aws_sdk_dynamodb::types::AttributeValue;
use storeshift_core::model::{DomainRecord, EntityType};
use storeshift_core::storage::{RepositoryError, Result};

use super::keys;

/// An alternate-key copy of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub item: Item,
    /// Whether at most one record may own this partition.
    pub unique: bool,
}

impl Projection {
    pub fn key(&self) -> (String, String) {
        item_key(&self.item)
    }
}

/// Every item written for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSet {
    pub primary: Item,
    pub projections: Vec<Projection>,
}

impl ItemSet {
    pub fn primary_key(&self) -> (String, String) {
        item_key(&self.primary)
    }

    pub fn projection_keys(&self) -> Vec<(String, String)> {
        self.projections.iter().map(Projection::key).collect()
    }
}

/// Alternate key of a record, before the attributes are attached.
pub(crate) struct ProjectionKey {
    pub pk: String,
    pub unique: bool,
}

impl ProjectionKey {
    pub fn unique(pk: String) -> Self {
        Self { pk, unique: true }
    }

    pub fn shared(pk: String) -> Self {
        Self { pk, unique: false }
    }
}

/// Encodes a record into its primary item and projections.
pub fn encode(record: &DomainRecord) -> Result<ItemSet> {
    let entity = record.entity_type();
    let (attributes, projections) = match record {
        DomainRecord::User(user) => user::encode(user)?,
        DomainRecord::Product(product) => product::encode(product)?,
        DomainRecord::Order(order) => order::encode(order)?,
        DomainRecord::Review(review) => review::encode(review)?,
    };
    let pk = keys::primary_key(record.key());

    let mut primary = attributes.clone();
    insert_keys(&mut primary, entity, &pk, &pk);
    attributes::put_string(&mut primary, keys::GSI1_PK, entity.as_str());
    attributes::put_string(&mut primary, keys::GSI1_SK, pk.as_str());

    let projections = projections
        .into_iter()
        .map(|projection| {
            let mut item = attributes.clone();
            insert_keys(&mut item, entity, &projection.pk, &pk);
            Projection {
                item,
                unique: projection.unique,
            }
        })
        .collect();

    Ok(ItemSet {
        primary,
        projections,
    })
}

/// Decodes any item of the table into the record named by its discriminator.
pub fn decode(item: &Item) -> Result<DomainRecord> {
    let discriminator = attributes::get_optional_string(item, keys::ENTITY_TYPE)
        .ok_or_else(|| RepositoryError::UnknownEntityType("<missing>".to_string()))?;
    let entity: EntityType = discriminator.parse()?;
    if discriminator != entity.as_str() {
        return Err(RepositoryError::UnknownEntityType(discriminator));
    }

    Ok(match entity {
        EntityType::User => DomainRecord::User(user::decode(item)?),
        EntityType::Product => DomainRecord::Product(product::decode(item)?),
        EntityType::Order => DomainRecord::Order(order::decode(item)?),
        EntityType::Review => DomainRecord::Review(review::decode(item)?),
    })
}

fn insert_keys(item: &mut Item, entity: EntityType, pk: &str, sk: &str) {
    attributes::put_string(item, keys::PK, pk);
    attributes::put_string(item, keys::SK, sk);
    attributes::put_string(item, keys::ENTITY_TYPE, entity.as_str());
}

fn item_key(item: &Item) -> (String, String) {
    let read = |name: &str| {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default()
    };
    (read(keys::PK), read(keys::SK))
}

/// Reads the `updatedAt` attribute as stored, for optimistic conditions.
pub fn version_attribute(item: &Item) -> Option<AttributeValue> {
    item.get("updatedAt").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeshift_core::model::{
        Order, OrderItem, PasswordReset, Product, Review, Timestamp, User, UserRole,
    };
    use uuid::Uuid;

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis).unwrap()
    }

    fn sample_user() -> User {
        User {
            id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440001").unwrap(),
            name: "Ana".to_string(),
            email: "a@x.com".to_string(),
            password: "h1".to_string(),
            role: UserRole::Admin,
            reset_password: Some(PasswordReset {
                token: "tok-1".to_string(),
                expires_at: at(1_700_003_600_000),
            }),
            created_at: at(1_700_000_000_001),
            updated_at: at(1_700_000_000_999),
        }
    }

    fn sample_product() -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Mug".to_string(),
            category: "kitchen".to_string(),
            description: String::new(),
            price: 1_500,
            images: vec!["front.png".to_string(), "back.png".to_string()],
            stock: 3,
            created_at: at(1_700_000_000_000),
            updated_at: at(1_700_000_000_000),
        }
    }

    fn sample_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_code: 12345,
            items: vec![OrderItem {
                product_id: Uuid::new_v4(),
                name: "Mug".to_string(),
                quantity: 2,
                price: 49_500,
            }],
            total_price: 99_000,
            paid_at: Some(at(1_700_000_100_000)),
            checkout_url: Some("https://pay.example/c/12345".to_string()),
            delivered: false,
            created_at: at(1_700_000_000_000),
            updated_at: at(1_700_000_100_000),
        }
    }

    fn sample_review() -> Review {
        Review {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            author_name: "Ana".to_string(),
            rating: 4,
            comment: "Solid mug".to_string(),
            created_at: at(1_700_000_000_000),
            updated_at: at(1_700_000_000_000),
        }
    }

    fn samples() -> Vec<DomainRecord> {
        vec![
            sample_user().into(),
            sample_product().into(),
            sample_order().into(),
            sample_review().into(),
        ]
    }

    #[test]
    fn test_round_trip_every_entity() {
        for record in samples() {
            let set = encode(&record).unwrap();
            assert_eq!(decode(&set.primary).unwrap(), record);
        }
    }

    #[test]
    fn test_projections_decode_to_same_record() {
        for record in samples() {
            let set = encode(&record).unwrap();
            for projection in &set.projections {
                assert_eq!(decode(&projection.item).unwrap(), record);
            }
        }
    }

    #[test]
    fn test_user_keys_and_projections() {
        let user = sample_user();
        let set = encode(&DomainRecord::User(user.clone())).unwrap();
        let pk = format!("USER#{}", user.id);

        assert_eq!(set.primary_key(), (pk.clone(), pk.clone()));
        assert_eq!(set.primary.get("GSI1PK").unwrap().as_s().unwrap(), "User");
        assert_eq!(set.primary.get("EntityType").unwrap().as_s().unwrap(), "User");
        assert_eq!(
            set.projection_keys(),
            vec![
                ("EMAIL#a@x.com".to_string(), pk.clone()),
                ("RESET#tok-1".to_string(), pk),
            ]
        );
        assert!(set.projections[0].unique);
        assert!(!set.projections[1].unique);
        assert!(!set.projections[0].item.contains_key("GSI1PK"));
    }

    #[test]
    fn test_user_without_reset_token_has_one_projection() {
        let mut user = sample_user();
        user.reset_password = None;
        let set = encode(&DomainRecord::User(user.clone())).unwrap();

        assert_eq!(set.projections.len(), 1);
        assert_eq!(decode(&set.primary).unwrap(), DomainRecord::User(user));
    }

    #[test]
    fn test_order_projections() {
        let order = sample_order();
        let set = encode(&DomainRecord::Order(order.clone())).unwrap();
        let pks: Vec<String> = set.projection_keys().into_iter().map(|(pk, _)| pk).collect();

        assert_eq!(
            pks,
            vec![
                "ORDERCODE#12345".to_string(),
                format!("USER#{}", order.user_id)
            ]
        );
        assert!(set.projections[0].unique);
    }

    #[test]
    fn test_unpaid_order_round_trip() {
        let mut order = sample_order();
        order.paid_at = None;
        order.checkout_url = None;
        let record = DomainRecord::Order(order);

        assert_eq!(decode(&encode(&record).unwrap().primary).unwrap(), record);
    }

    #[test]
    fn test_empty_email_fails_to_encode() {
        let mut user = sample_user();
        user.email = String::new();

        let err = encode(&DomainRecord::User(user)).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Encoding {
                entity_type: EntityType::User,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_attribute_fails_to_decode() {
        let set = encode(&sample_product().into()).unwrap();
        let mut item = set.primary;
        item.remove("price");

        assert_eq!(
            decode(&item).unwrap_err(),
            RepositoryError::encoding(EntityType::Product, "missing attribute `price`")
        );
    }

    #[test]
    fn test_unknown_discriminator() {
        let set = encode(&sample_review().into()).unwrap();
        let mut item = set.primary;
        item.insert(
            "EntityType".to_string(),
            AttributeValue::S("Invoice".to_string()),
        );

        assert_eq!(
            decode(&item).unwrap_err(),
            RepositoryError::UnknownEntityType("Invoice".to_string())
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let record: DomainRecord = sample_order().into();
        assert_eq!(encode(&record).unwrap(), encode(&record).unwrap());
    }
}
