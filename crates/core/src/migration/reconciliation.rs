use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{DomainRecord, EntityKey, EntityType, Timestamp};

/// One attribute whose value differs between the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: String,
    pub document: Value,
    pub key_value: Value,
}

/// Outcome of comparing one entity across both stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub found_in_document: bool,
    pub found_in_key_value: bool,
    pub matched: bool,
    pub differences: Vec<FieldDiff>,
    pub checked_at: Timestamp,
}

impl ReconciliationRecord {
    /// Compares the two sides of one entity.
    ///
    /// A record missing on one side never matches. Absent on both sides
    /// counts as matched.
    pub fn compare(
        key: EntityKey,
        document: Option<&DomainRecord>,
        key_value: Option<&DomainRecord>,
    ) -> Result<Self, serde_json::Error> {
        let differences = match (document, key_value) {
            (Some(document), Some(key_value)) => diff_records(document, key_value)?,
            _ => Vec::new(),
        };
        let matched = document.is_some() == key_value.is_some() && differences.is_empty();

        Ok(Self {
            entity_type: key.entity_type,
            entity_id: key.id,
            found_in_document: document.is_some(),
            found_in_key_value: key_value.is_some(),
            matched,
            differences,
            checked_at: Timestamp::now(),
        })
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id)
    }
}

/// Attribute-wise comparison of two records, ordered by field name.
///
/// Fields present on only one side are reported with `null` on the other.
pub fn diff_records(
    document: &DomainRecord,
    key_value: &DomainRecord,
) -> Result<Vec<FieldDiff>, serde_json::Error> {
    let left = document.to_fields()?;
    let right = key_value.to_fields()?;

    let fields: BTreeSet<&String> = left.keys().chain(right.keys()).collect();

    Ok(fields
        .into_iter()
        .filter_map(|field| {
            let document = left.get(field).cloned().unwrap_or(Value::Null);
            let key_value = right.get(field).cloned().unwrap_or(Value::Null);
            (document != key_value).then(|| FieldDiff {
                field: field.clone(),
                document,
                key_value,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Order};

    fn order(total_price: i64) -> Order {
        let mut order = Order::new(Uuid::nil(), 12345, Vec::new());
        order.total_price = total_price;
        order
    }

    #[test]
    fn test_flags_changed_field() {
        let primary = order(99_000);
        let mut shadow = primary.clone();
        shadow.total_price = 90_000;

        let record = ReconciliationRecord::compare(
            primary.entity_key(),
            Some(&primary.clone().into_record()),
            Some(&shadow.into_record()),
        )
        .unwrap();

        assert!(!record.matched);
        assert_eq!(record.differences.len(), 1);
        assert_eq!(record.differences[0].field, "totalPrice");
        assert_eq!(record.differences[0].document, 99_000);
        assert_eq!(record.differences[0].key_value, 90_000);
    }

    #[test]
    fn test_identical_records_match() {
        let primary = order(1_000).into_record();
        let record =
            ReconciliationRecord::compare(primary.key(), Some(&primary), Some(&primary)).unwrap();

        assert!(record.matched);
        assert!(record.differences.is_empty());
    }

    #[test]
    fn test_one_sided_record_never_matches() {
        let primary = order(1_000).into_record();
        let record = ReconciliationRecord::compare(primary.key(), Some(&primary), None).unwrap();

        assert!(!record.matched);
        assert!(record.found_in_document);
        assert!(!record.found_in_key_value);
    }
}
