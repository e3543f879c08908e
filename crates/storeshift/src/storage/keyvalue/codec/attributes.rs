//! Attribute accessors shared by the per-entity codecs.
//!
//! Readers report a missing or malformed attribute as an `Encoding` error
//! naming the entity type and the attribute.

use std::collections::HashMap;
use std::str::FromStr;

use aws_sdk_dynamodb::types::AttributeValue;
use storeshift_core::model::{EntityType, Timestamp};
use storeshift_core::storage::{RepositoryError, Result};
use uuid::Uuid;

pub type Item = HashMap<String, AttributeValue>;

// ============================================================================
// Writers
// ============================================================================

pub fn put_string(item: &mut Item, name: &str, value: impl Into<String>) {
    item.insert(name.to_string(), AttributeValue::S(value.into()));
}

pub fn put_number(item: &mut Item, name: &str, value: impl ToString) {
    item.insert(name.to_string(), AttributeValue::N(value.to_string()));
}

pub fn put_bool(item: &mut Item, name: &str, value: bool) {
    item.insert(name.to_string(), AttributeValue::Bool(value));
}

pub fn put_timestamp(item: &mut Item, name: &str, value: Timestamp) {
    put_string(item, name, value.to_rfc3339());
}

pub fn put_optional_string(item: &mut Item, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        put_string(item, name, value);
    }
}

pub fn put_optional_timestamp(item: &mut Item, name: &str, value: Option<Timestamp>) {
    if let Some(value) = value {
        put_timestamp(item, name, value);
    }
}

pub fn put_string_list(item: &mut Item, name: &str, values: &[String]) {
    let list = values
        .iter()
        .map(|value| AttributeValue::S(value.clone()))
        .collect();
    item.insert(name.to_string(), AttributeValue::L(list));
}

/// Fails when a value that forms part of a key is empty.
pub fn require_key_part(entity: EntityType, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RepositoryError::encoding(
            entity,
            format!("key attribute `{name}` is empty"),
        ));
    }
    Ok(())
}

// ============================================================================
// Readers
// ============================================================================

fn missing(entity: EntityType, name: &str) -> RepositoryError {
    RepositoryError::encoding(entity, format!("missing attribute `{name}`"))
}

fn malformed(entity: EntityType, name: &str, reason: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::encoding(entity, format!("malformed attribute `{name}`: {reason}"))
}

pub fn get_string(item: &Item, entity: EntityType, name: &str) -> Result<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| missing(entity, name))
}

pub fn get_optional_string(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

pub fn get_uuid(item: &Item, entity: EntityType, name: &str) -> Result<Uuid> {
    let value = get_string(item, entity, name)?;
    Uuid::parse_str(&value).map_err(|e| malformed(entity, name, e))
}

pub fn get_number<T>(item: &Item, entity: EntityType, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = item
        .get(name)
        .and_then(|v| v.as_n().ok())
        .ok_or_else(|| missing(entity, name))?;
    value.parse().map_err(|e| malformed(entity, name, e))
}

pub fn get_bool(item: &Item, entity: EntityType, name: &str) -> Result<bool> {
    item.get(name)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .ok_or_else(|| missing(entity, name))
}

pub fn get_timestamp(item: &Item, entity: EntityType, name: &str) -> Result<Timestamp> {
    let value = get_string(item, entity, name)?;
    Timestamp::parse_rfc3339(&value).map_err(|e| malformed(entity, name, e))
}

pub fn get_optional_timestamp(
    item: &Item,
    entity: EntityType,
    name: &str,
) -> Result<Option<Timestamp>> {
    match get_optional_string(item, name) {
        Some(value) => Timestamp::parse_rfc3339(&value)
            .map(Some)
            .map_err(|e| malformed(entity, name, e)),
        None => Ok(None),
    }
}

pub fn get_string_list(item: &Item, entity: EntityType, name: &str) -> Result<Vec<String>> {
    let list = item
        .get(name)
        .and_then(|v| v.as_l().ok())
        .ok_or_else(|| missing(entity, name))?;
    list.iter()
        .map(|value| {
            value
                .as_s()
                .cloned()
                .map_err(|_| malformed(entity, name, "list element is not a string"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_attribute_names_entity_and_field() {
        let item = Item::new();
        let err = get_string(&item, EntityType::User, "email").unwrap_err();

        assert_eq!(
            err,
            RepositoryError::encoding(EntityType::User, "missing attribute `email`")
        );
    }

    #[test]
    fn test_number_parse_failure_is_encoding_error() {
        let mut item = Item::new();
        item.insert("price".to_string(), AttributeValue::N("abc".to_string()));

        let err = get_number::<i64>(&item, EntityType::Product, "price").unwrap_err();
        assert!(err.is_codec());
    }

    #[test]
    fn test_optional_timestamp() {
        let mut item = Item::new();
        assert_eq!(
            get_optional_timestamp(&item, EntityType::Order, "paidAt").unwrap(),
            None
        );

        let ts = Timestamp::from_millis(1_700_000_000_123).unwrap();
        put_optional_timestamp(&mut item, "paidAt", Some(ts));
        assert_eq!(
            get_optional_timestamp(&item, EntityType::Order, "paidAt").unwrap(),
            Some(ts)
        );
    }

    #[test]
    fn test_string_list_keeps_order() {
        let mut item = Item::new();
        let images = vec!["b.png".to_string(), "a.png".to_string()];
        put_string_list(&mut item, "images", &images);

        assert_eq!(
            get_string_list(&item, EntityType::Product, "images").unwrap(),
            images
        );
    }

    #[test]
    fn test_require_key_part() {
        assert!(require_key_part(EntityType::User, "email", "a@x.com").is_ok());
        assert!(require_key_part(EntityType::User, "email", "").is_err());
    }
}
