//! DynamoDB implementation of [`ItemTable`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, Delete, GlobalSecondaryIndex,
    KeySchemaElement, KeyType, Projection, ProjectionType, Put, ScalarAttributeType, TableStatus,
    TransactWriteItem,
};
use aws_sdk_dynamodb::Client;
use storeshift_core::model::EntityType;

use super::codec::Item;
use super::keys;
use super::table::{ItemTable, TableError, TableResult, TableWrite, WriteCondition};

/// Single-table access through `aws-sdk-dynamodb`.
#[derive(Debug, Clone)]
pub struct DynamoDbTable {
    client: Client,
    table_name: String,
}

impl DynamoDbTable {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Builds a client from the default AWS credential chain.
    ///
    /// `endpoint_url` points the client at a local DynamoDB.
    pub async fn connect(
        endpoint_url: Option<&str>,
        region: &str,
        table_name: impl Into<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config), table_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Creates the table with its primary key and type index.
    ///
    /// Returns `false` when the table already exists.
    pub async fn create_table(&self) -> TableResult<bool> {
        let key_schema = vec![
            key_element(keys::PK, KeyType::Hash)?,
            key_element(keys::SK, KeyType::Range)?,
        ];
        let attribute_definitions = vec![
            string_attribute(keys::PK)?,
            string_attribute(keys::SK)?,
            string_attribute(keys::GSI1_PK)?,
            string_attribute(keys::GSI1_SK)?,
        ];
        let type_index = GlobalSecondaryIndex::builder()
            .index_name(keys::TYPE_INDEX)
            .set_key_schema(Some(vec![
                key_element(keys::GSI1_PK, KeyType::Hash)?,
                key_element(keys::GSI1_SK, KeyType::Range)?,
            ]))
            .projection(
                Projection::builder()
                    .projection_type(ProjectionType::All)
                    .build(),
            )
            .build()
            .map_err(|e| TableError::Failed(e.to_string()))?;

        let result = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .set_key_schema(Some(key_schema))
            .set_attribute_definitions(Some(attribute_definitions))
            .global_secondary_indexes(type_index)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err)
                if matches!(
                    err.as_service_error(),
                    Some(CreateTableError::ResourceInUseException(_))
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(map_sdk_error(err, "CreateTable")),
        }
    }

    /// Polls until the table reports `ACTIVE`.
    pub async fn wait_until_active(&self, max_attempts: u32, delay: Duration) -> TableResult<()> {
        for _ in 0..max_attempts {
            let output = self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "DescribeTable"))?;

            let active = output
                .table()
                .and_then(|table| table.table_status())
                .is_some_and(|status| *status == TableStatus::Active);
            if active {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
        }

        Err(TableError::Failed(format!(
            "table {} did not become active",
            self.table_name
        )))
    }

    async fn query_all(
        &self,
        index_name: Option<&str>,
        key_condition: &str,
        values: HashMap<String, AttributeValue>,
    ) -> TableResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .set_index_name(index_name.map(str::to_string))
                // Index queries cannot be strongly consistent.
                .set_consistent_read(index_name.is_none().then_some(true))
                .key_condition_expression(key_condition)
                .set_expression_attribute_values(Some(values.clone()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "Query"))?;

            items.extend(output.items.unwrap_or_default());

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl ItemTable for DynamoDbTable {
    async fn get_item(&self, pk: &str, sk: &str) -> TableResult<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(keys::PK, AttributeValue::S(pk.to_string()))
            .key(keys::SK, AttributeValue::S(sk.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "GetItem"))?;

        Ok(output.item)
    }

    async fn query_partition(&self, pk: &str, sk_prefix: Option<&str>) -> TableResult<Vec<Item>> {
        let mut values = HashMap::from([(":pk".to_string(), AttributeValue::S(pk.to_string()))]);

        let key_condition = match sk_prefix {
            Some(prefix) => {
                values.insert(":prefix".to_string(), AttributeValue::S(prefix.to_string()));
                "PK = :pk AND begins_with(SK, :prefix)"
            }
            None => "PK = :pk",
        };

        self.query_all(None, key_condition, values).await
    }

    async fn query_entity_type(&self, entity_type: EntityType) -> TableResult<Vec<Item>> {
        let values = HashMap::from([(
            ":type".to_string(),
            AttributeValue::S(entity_type.as_str().to_string()),
        )]);

        self.query_all(Some(keys::TYPE_INDEX), "GSI1PK = :type", values)
            .await
    }

    async fn transact_write(&self, writes: Vec<TableWrite>) -> TableResult<()> {
        let items = writes
            .into_iter()
            .map(|write| self.transact_item(write))
            .collect::<TableResult<Vec<_>>>()?;

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(map_transact_error)?;

        Ok(())
    }
}

// ============================================================================
// Request building
// ============================================================================

struct ConditionParts {
    expression: Option<String>,
    names: Option<HashMap<String, String>>,
    values: Option<HashMap<String, AttributeValue>>,
}

fn condition_parts(condition: WriteCondition) -> ConditionParts {
    match condition {
        WriteCondition::Always => ConditionParts {
            expression: None,
            names: None,
            values: None,
        },
        WriteCondition::NotExists => ConditionParts {
            expression: Some(format!("attribute_not_exists({})", keys::PK)),
            names: None,
            values: None,
        },
        WriteCondition::Exists => ConditionParts {
            expression: Some(format!("attribute_exists({})", keys::PK)),
            names: None,
            values: None,
        },
        WriteCondition::AttributeEquals { name, value } => ConditionParts {
            expression: Some("#expected = :expected".to_string()),
            names: Some(HashMap::from([("#expected".to_string(), name)])),
            values: Some(HashMap::from([(":expected".to_string(), value)])),
        },
    }
}

impl DynamoDbTable {
    fn transact_item(&self, write: TableWrite) -> TableResult<TransactWriteItem> {
        let item = match write {
            TableWrite::Put { item, condition } => {
                let parts = condition_parts(condition);
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(item))
                    .set_condition_expression(parts.expression)
                    .set_expression_attribute_names(parts.names)
                    .set_expression_attribute_values(parts.values)
                    .build()
                    .map_err(|e| TableError::Failed(e.to_string()))?;
                TransactWriteItem::builder().put(put).build()
            }
            TableWrite::Delete { pk, sk, condition } => {
                let parts = condition_parts(condition);
                let delete = Delete::builder()
                    .table_name(&self.table_name)
                    .key(keys::PK, AttributeValue::S(pk))
                    .key(keys::SK, AttributeValue::S(sk))
                    .set_condition_expression(parts.expression)
                    .set_expression_attribute_names(parts.names)
                    .set_expression_attribute_values(parts.values)
                    .build()
                    .map_err(|e| TableError::Failed(e.to_string()))?;
                TransactWriteItem::builder().delete(delete).build()
            }
        };
        Ok(item)
    }
}

fn key_element(name: &str, key_type: KeyType) -> TableResult<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(|e| TableError::Failed(e.to_string()))
}

fn string_attribute(name: &str) -> TableResult<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| TableError::Failed(e.to_string()))
}

// ============================================================================
// Error mapping
// ============================================================================

fn map_sdk_error<E, R>(err: SdkError<E, R>, operation: &str) -> TableError
where
    E: std::error::Error + 'static,
    R: Debug,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => TableError::Unavailable(
            format!("{operation} could not reach DynamoDB: {}", DisplayErrorContext(&err)),
        ),
        _ => TableError::Failed(format!(
            "{operation} failed: {}",
            DisplayErrorContext(&err)
        )),
    }
}

/// Maps a cancelled transaction to the index of the write whose condition failed.
fn map_transact_error<R: Debug>(err: SdkError<TransactWriteItemsError, R>) -> TableError {
    if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
        err.as_service_error()
    {
        let reasons = cancelled.cancellation_reasons();
        if let Some(index) = reasons
            .iter()
            .position(|reason| reason.code() == Some("ConditionalCheckFailed"))
        {
            return TableError::ConditionFailed { index };
        }
        let codes: Vec<&str> = reasons.iter().filter_map(|reason| reason.code()).collect();
        return TableError::Failed(format!("transaction cancelled: {codes:?}"));
    }
    map_sdk_error(err, "TransactWriteItems")
}
