use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Order, Product, Review, Timestamp, User};
use crate::storage::RepositoryError;

/// Discriminator naming the four entity types that share the item table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    User,
    Product,
    Order,
    Review,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::User,
        EntityType::Product,
        EntityType::Order,
        EntityType::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "User",
            EntityType::Product => "Product",
            EntityType::Order => "Order",
            EntityType::Review => "Review",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity| entity.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RepositoryError::UnknownEntityType(s.to_string()))
    }
}

/// Identifies one logical entity in either store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: Uuid,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: Uuid) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// Any domain record, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "record")]
pub enum DomainRecord {
    User(User),
    Product(Product),
    Order(Order),
    Review(Review),
}

impl DomainRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            DomainRecord::User(_) => EntityType::User,
            DomainRecord::Product(_) => EntityType::Product,
            DomainRecord::Order(_) => EntityType::Order,
            DomainRecord::Review(_) => EntityType::Review,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            DomainRecord::User(user) => user.id,
            DomainRecord::Product(product) => product.id,
            DomainRecord::Order(order) => order.id,
            DomainRecord::Review(review) => review.id,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type(), self.id())
    }

    pub fn updated_at(&self) -> Timestamp {
        match self {
            DomainRecord::User(user) => user.updated_at,
            DomainRecord::Product(product) => product.updated_at,
            DomainRecord::Order(order) => order.updated_at,
            DomainRecord::Review(review) => review.updated_at,
        }
    }

    /// The record's attributes as a JSON object keyed by serialized field name.
    pub fn to_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let value = match self {
            DomainRecord::User(user) => serde_json::to_value(user)?,
            DomainRecord::Product(product) => serde_json::to_value(product)?,
            DomainRecord::Order(order) => serde_json::to_value(order)?,
            DomainRecord::Review(review) => serde_json::to_value(review)?,
        };
        Ok(match value {
            Value::Object(fields) => fields,
            _ => Map::new(),
        })
    }
}

/// Implemented by the four record types so generic code can move between
/// a concrete record and [`DomainRecord`].
pub trait Entity: Clone + Send + Sync + 'static {
    const ENTITY_TYPE: EntityType;

    fn entity_id(&self) -> Uuid;

    fn into_record(self) -> DomainRecord;

    fn from_record(record: DomainRecord) -> Option<Self>;

    fn entity_key(&self) -> EntityKey {
        EntityKey::new(Self::ENTITY_TYPE, self.entity_id())
    }
}

macro_rules! impl_entity {
    ($ty:ident) => {
        impl Entity for $ty {
            const ENTITY_TYPE: EntityType = EntityType::$ty;

            fn entity_id(&self) -> Uuid {
                self.id
            }

            fn into_record(self) -> DomainRecord {
                DomainRecord::$ty(self)
            }

            fn from_record(record: DomainRecord) -> Option<Self> {
                match record {
                    DomainRecord::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for DomainRecord {
            fn from(value: $ty) -> Self {
                DomainRecord::$ty(value)
            }
        }
    };
}

impl_entity!(User);
impl_entity!(Product);
impl_entity!(Order);
impl_entity!(Review);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("User".parse::<EntityType>().unwrap(), EntityType::User);
        assert_eq!("order".parse::<EntityType>().unwrap(), EntityType::Order);
        assert_eq!(
            "Invoice".parse::<EntityType>().unwrap_err(),
            RepositoryError::UnknownEntityType("Invoice".to_string())
        );
    }

    #[test]
    fn test_record_key() {
        let user = User::new("Ana", "a@x.com", "h1");
        let record = DomainRecord::from(user.clone());

        assert_eq!(record.key(), EntityKey::new(EntityType::User, user.id));
        assert_eq!(User::from_record(record), Some(user));
    }

    #[test]
    fn test_to_fields_uses_serialized_names() {
        let order = Order::new(Uuid::new_v4(), 7, Vec::new());
        let fields = DomainRecord::Order(order).to_fields().unwrap();

        assert!(fields.contains_key("orderCode"));
        assert!(fields.contains_key("totalPrice"));
        assert!(!fields.contains_key("entityType"));
    }

    #[test]
    fn test_tagged_serialization() {
        let product = Product::new("Mug", "kitchen", 1_500);
        let json = serde_json::to_value(DomainRecord::Product(product)).unwrap();

        assert_eq!(json["entityType"], "Product");
        assert_eq!(json["record"]["category"], "kitchen");
    }
}
