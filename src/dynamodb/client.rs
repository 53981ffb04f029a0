use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{
        AttributeDefinition, AttributeValue, BillingMode, DeleteRequest, GlobalSecondaryIndex,
        KeySchemaElement, KeyType, KeysAndAttributes, ProjectionType, ProvisionedThroughput,
        PutRequest, ReturnValue, ScalarAttributeType, TableStatus as AwsTableStatus, WriteRequest,
    },
    Client,
};
use tracing::{debug, error, info};

use crate::dynamodb::table::{KeyAttribute, TableDefinition};
use crate::dynamodb::{
    AttributeType, Error, Expression, Item, Projection, Result, Throughput, Value,
};

type AwsItem = HashMap<String, AttributeValue>;

/// One entry of a batch submission.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
    Put(Item),
    Delete(Item),
    /// A key to read. Only appears in exhausted batch reads.
    Get(Item),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

/// A query as handed to the client. Names and values are merged from the
/// built key condition and whatever the caller passed through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, Value>,
    pub limit: Option<i32>,
    pub scan_index_forward: Option<bool>,
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, Value>,
    pub limit: Option<i32>,
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Other(String),
}

/// The store a [`Model`](crate::dynamodb::Model) reads from and writes to.
///
/// Items exchanged here have already been through the pipeline: attribute
/// names are canonical and timestamps are epoch seconds. Marshalling into a
/// wire format is the implementation's job.
#[async_trait]
pub trait DbClient: Send + Sync {
    async fn get(&self, table: &str, key: Item) -> Result<Option<Item>>;

    async fn batch_get(&self, table: &str, keys: Vec<Item>) -> Result<BatchGetOutput>;

    async fn put(&self, table: &str, item: Item, condition: Option<Expression>) -> Result<()>;

    /// Applies `update` and returns the record as it is after the update.
    async fn update(&self, table: &str, key: Item, update: Expression) -> Result<Option<Item>>;

    /// Deletes and returns the record as it was before the delete.
    async fn delete(&self, table: &str, key: Item) -> Result<Option<Item>>;

    /// Returns the requests the store left unprocessed.
    async fn batch_write(&self, table: &str, requests: Vec<BatchRequest>)
        -> Result<Vec<BatchRequest>>;

    async fn query(&self, request: QueryRequest) -> Result<Vec<Item>>;

    async fn scan(&self, request: ScanRequest) -> Result<Vec<Item>>;

    /// `None` when the table does not exist. Clients that cannot tell report
    /// every table as active.
    async fn table_status(&self, _table: &str) -> Result<Option<TableStatus>> {
        Ok(Some(TableStatus::Active))
    }

    async fn create_table(&self, _definition: &TableDefinition) -> Result<()> {
        Ok(())
    }
}

/// [`DbClient`] backed by the AWS SDK.
///
/// Items are marshalled with `serde_dynamo`. Service errors keep their error
/// code so batch retries can tell throttling apart from real failures.
///
/// # Example
///
/// ```no_run
/// use dynamo_model::dynamodb::AwsDynamoDb;
///
/// # async fn run() -> anyhow::Result<()> {
/// let sdk_config = aws_config::load_from_env().await;
/// let client = AwsDynamoDb::new(&sdk_config);
/// client.check_auth().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AwsDynamoDb {
    client: Client,
}

impl AwsDynamoDb {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Verifies authentication by attempting to list tables.
    pub async fn check_auth(&self) -> Result<()> {
        self.client.list_tables().send().await.map_err(|e| {
            error!("Authentication failed: {}", DisplayErrorContext(&e));
            sdk_error("", e)
        })?;
        info!("Authentication successful");
        Ok(())
    }
}

#[async_trait]
impl DbClient for AwsDynamoDb {
    async fn get(&self, table: &str, key: Item) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(to_aws(&key)?))
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        output.item.map(from_aws).transpose()
    }

    async fn batch_get(&self, table: &str, keys: Vec<Item>) -> Result<BatchGetOutput> {
        let keys = keys.iter().map(to_aws).collect::<Result<Vec<_>>>()?;
        let output = self
            .client
            .batch_get_item()
            .request_items(
                table,
                KeysAndAttributes::builder().set_keys(Some(keys)).build()?,
            )
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        let items = output
            .responses
            .and_then(|mut responses| responses.remove(table))
            .unwrap_or_default()
            .into_iter()
            .map(from_aws)
            .collect::<Result<Vec<_>>>()?;
        let unprocessed_keys = output
            .unprocessed_keys
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .map(|keys| keys.keys)
            .unwrap_or_default()
            .into_iter()
            .map(from_aws)
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }

    async fn put(&self, table: &str, item: Item, condition: Option<Expression>) -> Result<()> {
        let (condition_expression, names, values) = match condition {
            Some(condition) => (
                Some(condition.expression),
                expression_names(condition.names),
                expression_values(&condition.values)?,
            ),
            None => (None, None, None),
        };

        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_aws(&item)?))
            .set_condition_expression(condition_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        debug!("Item added to '{table}'");
        Ok(())
    }

    async fn update(&self, table: &str, key: Item, update: Expression) -> Result<Option<Item>> {
        let output = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(to_aws(&key)?))
            .update_expression(update.expression)
            .set_expression_attribute_names(expression_names(update.names))
            .set_expression_attribute_values(expression_values(&update.values)?)
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        output.attributes.map(from_aws).transpose()
    }

    async fn delete(&self, table: &str, key: Item) -> Result<Option<Item>> {
        let output = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(to_aws(&key)?))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        output.attributes.map(from_aws).transpose()
    }

    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<BatchRequest>> {
        let writes = requests
            .iter()
            .map(write_request)
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(table, writes)
            .send()
            .await
            .map_err(|e| sdk_error(table, e))?;

        output
            .unprocessed_items
            .and_then(|mut unprocessed| unprocessed.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|write| match (write.put_request, write.delete_request) {
                (Some(put), _) => Some(from_aws(put.item).map(BatchRequest::Put)),
                (None, Some(delete)) => Some(from_aws(delete.key).map(BatchRequest::Delete)),
                (None, None) => None,
            })
            .collect()
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Item>> {
        let names = expression_names(request.expression_attribute_names);
        let values = expression_values(&request.expression_attribute_values)?;
        let mut items = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let response = self
                .client
                .query()
                .table_name(&request.table_name)
                .set_index_name(request.index_name.clone())
                .set_key_condition_expression(request.key_condition_expression.clone())
                .set_filter_expression(request.filter_expression.clone())
                .set_expression_attribute_names(names.clone())
                .set_expression_attribute_values(values.clone())
                .set_limit(request.limit)
                .set_scan_index_forward(request.scan_index_forward)
                .set_consistent_read(request.consistent_read)
                .set_exclusive_start_key(last_evaluated_key)
                .send()
                .await
                .map_err(|e| sdk_error(&request.table_name, e))?;

            for item in response.items.unwrap_or_default() {
                items.push(from_aws(item)?);
            }

            last_evaluated_key = response.last_evaluated_key;

            if last_evaluated_key.is_none() || request.limit.is_some() {
                break;
            }
        }

        Ok(items)
    }

    async fn scan(&self, request: ScanRequest) -> Result<Vec<Item>> {
        let names = expression_names(request.expression_attribute_names);
        let values = expression_values(&request.expression_attribute_values)?;
        let mut items = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let response = self
                .client
                .scan()
                .table_name(&request.table_name)
                .set_index_name(request.index_name.clone())
                .set_filter_expression(request.filter_expression.clone())
                .set_expression_attribute_names(names.clone())
                .set_expression_attribute_values(values.clone())
                .set_limit(request.limit)
                .set_consistent_read(request.consistent_read)
                .set_exclusive_start_key(last_evaluated_key)
                .send()
                .await
                .map_err(|e| sdk_error(&request.table_name, e))?;

            for item in response.items.unwrap_or_default() {
                items.push(from_aws(item)?);
            }

            last_evaluated_key = response.last_evaluated_key;

            if last_evaluated_key.is_none() || request.limit.is_some() {
                break;
            }
        }

        Ok(items)
    }

    async fn table_status(&self, table: &str) -> Result<Option<TableStatus>> {
        let output = match self.client.describe_table().table_name(table).send().await {
            Ok(output) => output,
            Err(e) => {
                return match sdk_error(table, e) {
                    Error::TableNotFound(_) => Ok(None),
                    e => Err(e),
                }
            }
        };

        let status = output
            .table
            .and_then(|description| description.table_status)
            .map(|status| match status {
                AwsTableStatus::Active => TableStatus::Active,
                AwsTableStatus::Creating => TableStatus::Creating,
                AwsTableStatus::Updating => TableStatus::Updating,
                AwsTableStatus::Deleting => TableStatus::Deleting,
                other => TableStatus::Other(other.as_str().to_string()),
            });
        Ok(Some(status.unwrap_or(TableStatus::Creating)))
    }

    async fn create_table(&self, definition: &TableDefinition) -> Result<()> {
        let attribute_definitions = definition
            .attributes
            .iter()
            .map(|attribute| {
                AttributeDefinition::builder()
                    .attribute_name(&attribute.name)
                    .attribute_type(scalar_type(attribute))
                    .build()
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let table_key_schema = key_schema(&definition.hash_key, definition.range_key.as_deref())?;
        let table_throughput = definition.throughput.map(provisioned).transpose()?;

        let indexes = definition
            .indexes
            .iter()
            .map(|index| -> Result<GlobalSecondaryIndex> {
                let projection = aws_sdk_dynamodb::types::Projection::builder();
                let projection = match &index.projection {
                    Projection::All => projection.projection_type(ProjectionType::All),
                    Projection::KeysOnly => projection.projection_type(ProjectionType::KeysOnly),
                    Projection::Include(attributes) => projection
                        .projection_type(ProjectionType::Include)
                        .set_non_key_attributes(Some(attributes.clone())),
                };
                let throughput = match definition.throughput {
                    Some(table) => Some(provisioned(index.throughput.unwrap_or(table))?),
                    None => None,
                };
                Ok(GlobalSecondaryIndex::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(key_schema(&index.hash_key, index.range_key.as_deref())?))
                    .projection(projection.build())
                    .set_provisioned_throughput(throughput)
                    .build()?)
            })
            .collect::<Result<Vec<_>>>()?;

        let billing_mode = match table_throughput {
            Some(_) => BillingMode::Provisioned,
            None => BillingMode::PayPerRequest,
        };

        self.client
            .create_table()
            .table_name(&definition.table_name)
            .billing_mode(billing_mode)
            .set_attribute_definitions(Some(attribute_definitions))
            .set_key_schema(Some(table_key_schema))
            .set_global_secondary_indexes((!indexes.is_empty()).then_some(indexes))
            .set_provisioned_throughput(table_throughput)
            .send()
            .await
            .map_err(|e| sdk_error(&definition.table_name, e))?;

        info!("Table '{}' created", definition.table_name);
        Ok(())
    }
}

fn to_aws(item: &Item) -> Result<AwsItem> {
    Ok(serde_dynamo::to_item(item)?)
}

fn from_aws(item: AwsItem) -> Result<Item> {
    Ok(serde_dynamo::from_item(item)?)
}

fn write_request(request: &BatchRequest) -> Result<WriteRequest> {
    match request {
        BatchRequest::Put(item) => Ok(WriteRequest::builder()
            .put_request(PutRequest::builder().set_item(Some(to_aws(item)?)).build()?)
            .build()),
        BatchRequest::Delete(key) => Ok(WriteRequest::builder()
            .delete_request(DeleteRequest::builder().set_key(Some(to_aws(key)?)).build()?)
            .build()),
        BatchRequest::Get(_) => Err(Error::item_input(
            "a read request cannot be part of a batch write",
        )),
    }
}

fn expression_names(names: BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!names.is_empty()).then(|| names.into_iter().collect())
}

fn expression_values(
    values: &BTreeMap<String, Value>,
) -> Result<Option<HashMap<String, AttributeValue>>> {
    if values.is_empty() {
        return Ok(None);
    }
    values
        .iter()
        .map(|(placeholder, value)| -> Result<(String, AttributeValue)> {
            Ok((placeholder.clone(), serde_dynamo::to_attribute_value(value)?))
        })
        .collect::<Result<HashMap<_, _>>>()
        .map(Some)
}

fn key_schema(hash_key: &str, range_key: Option<&str>) -> Result<Vec<KeySchemaElement>> {
    let mut key_schema = vec![KeySchemaElement::builder()
        .attribute_name(hash_key)
        .key_type(KeyType::Hash)
        .build()?];

    if let Some(range_key) = range_key {
        key_schema.push(
            KeySchemaElement::builder()
                .attribute_name(range_key)
                .key_type(KeyType::Range)
                .build()?,
        );
    }
    Ok(key_schema)
}

fn scalar_type(attribute: &KeyAttribute) -> ScalarAttributeType {
    match attribute.attr_type {
        AttributeType::Number => ScalarAttributeType::N,
        AttributeType::Binary => ScalarAttributeType::B,
        _ => ScalarAttributeType::S,
    }
}

fn provisioned(throughput: Throughput) -> Result<ProvisionedThroughput> {
    Ok(ProvisionedThroughput::builder()
        .read_capacity_units(throughput.read)
        .write_capacity_units(throughput.write)
        .build()?)
}

/// Maps an SDK failure onto the crate error, keeping the service error code.
fn sdk_error<E, R>(table: &str, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if let SdkError::DispatchFailure(failure) = &err {
        let refused = DisplayErrorContext(&err)
            .to_string()
            .to_lowercase()
            .contains("connection refused");
        if failure.is_io() && refused {
            return Error::ConnectionRefused(err.into());
        }
    }

    let code = err.code().map(str::to_string);
    match code.as_deref() {
        Some("ResourceNotFoundException") => Error::TableNotFound(table.to_string()),
        code => Error::client(code, err),
    }
}
