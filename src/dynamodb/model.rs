use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use futures_util::future::try_join_all;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::dynamodb::expressions::{attribute_not_exists, build_update_expression, NullHandling};
use crate::dynamodb::pipeline::{
    self, Direction, IoContext, IoOptions, UnknownAttributes, FROM_DB_STEPS, KEY_STEPS,
    TO_DB_STEPS, UPDATE_STEPS,
};
use crate::dynamodb::retry::{self, RetryConfig};
use crate::dynamodb::table::{TableDefinition, TableSetup};
use crate::dynamodb::validation::{
    merge_table_keys_into_model_schema, validate_model_schema, validate_table_keys, AliasMaps,
};
use crate::dynamodb::{
    build_key_condition, AttributeConfig, BatchRequest, DbClient, Error, Item, ItemTransform,
    ItemValidateFn, QueryRequest, Result, ScanRequest, Schema, TableKeys, TableStatus, Throughput,
    Value, WhereQuery,
};

/// Attribute added by `timestamps` and set when an item is first written.
pub const CREATED_AT: &str = "createdAt";
/// Attribute added by `timestamps` and refreshed on every write.
pub const UPDATED_AT: &str = "updatedAt";

/// Most write requests the store accepts in one batch.
pub const BATCH_WRITE_SIZE: usize = 25;
/// Most keys the store accepts in one batch read.
pub const BATCH_READ_SIZE: usize = 100;

#[derive(Clone, Default)]
pub struct ModelOptions {
    pub allow_unknown_attributes: UnknownAttributes,
    /// Adds `createdAt`/`updatedAt` timestamp attributes.
    pub timestamps: bool,
    pub transform_item: ItemTransform,
    pub validate_item: Option<ItemValidateFn>,
    pub retry: RetryConfig,
}

impl fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelOptions")
            .field("allow_unknown_attributes", &self.allow_unknown_attributes)
            .field("timestamps", &self.timestamps)
            .field("transform_item", &self.transform_item)
            .field("validate_item", &self.validate_item.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Declarative description of a model, validated by [`Model::new`].
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub table_name: String,
    /// Key attributes with their hash/range/index roles.
    pub table_keys: Schema,
    pub schema: Schema,
    pub options: ModelOptions,
}

impl ModelConfig {
    pub fn new(
        name: impl Into<String>,
        table_name: impl Into<String>,
        table_keys: Schema,
        schema: Schema,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            table_keys,
            schema,
            options: ModelOptions::default(),
        }
    }

    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub nulls: NullHandling,
}

/// Query parameters. With `where_clause` set, the key condition is built
/// from it and the index is resolved automatically unless `index_name` pins
/// one. Without it the raw expression fields are sent as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryInput {
    pub where_clause: Option<WhereQuery>,
    pub index_name: Option<String>,
    pub limit: Option<i32>,
    pub scan_index_forward: Option<bool>,
    pub consistent_read: Option<bool>,
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, Value>,
}

impl QueryInput {
    pub fn where_clause(query: WhereQuery) -> Self {
        Self {
            where_clause: Some(query),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanInput {
    pub index_name: Option<String>,
    pub limit: Option<i32>,
    pub consistent_read: Option<bool>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: BTreeMap<String, Value>,
}

/// Results of a combined batch write, as they would be read back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    pub upserted: Vec<Item>,
    pub deleted: Vec<Item>,
}

/// A validated schema bound to a table and a [`DbClient`].
///
/// Every item written goes through the toDB pipeline and every item read goes
/// through the fromDB pipeline. The schema is immutable after construction,
/// so one model can serve any number of concurrent calls.
///
/// # Example
///
/// ```no_run
/// use dynamo_model::dynamodb::{AttributeConfig, AwsDynamoDb, Item, Model, ModelConfig, Schema};
///
/// # async fn run() -> dynamo_model::dynamodb::Result<()> {
/// let sdk_config = aws_config::load_from_env().await;
/// let keys = Schema::new().attribute("id", AttributeConfig::string().required().hash_key());
/// let schema = Schema::new().attribute("name", AttributeConfig::string());
/// let users = Model::new(
///     AwsDynamoDb::new(&sdk_config),
///     ModelConfig::new("User", "users", keys, schema),
/// )?;
///
/// users.create(Item::new().set("id", "u1").set("name", "Ada")).await?;
/// let found = users.get(Item::new().set("id", "u1")).await?;
/// # Ok(())
/// # }
/// ```
pub struct Model<C> {
    name: String,
    table_name: String,
    client: C,
    keys: TableKeys,
    schema: Schema,
    alias_maps: AliasMaps,
    key_schema: Schema,
    key_alias_maps: AliasMaps,
    io: IoOptions,
    timestamps: bool,
    retry: RetryConfig,
}

impl<C> fmt::Debug for Model<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("keys", &self.keys)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl<C: DbClient> Model<C> {
    /// Validates the table keys and model schema and merges them.
    ///
    /// Fails with [`Error::SchemaValidation`] on any malformed declaration;
    /// no model exists in that case.
    pub fn new(client: C, config: ModelConfig) -> Result<Self> {
        let ModelConfig {
            name,
            table_name,
            table_keys,
            schema,
            options,
        } = config;

        let keys = validate_table_keys(&table_keys)?;
        validate_model_schema(&schema, &name)?;

        let mut merged = merge_table_keys_into_model_schema(&table_keys, &schema)?;
        if options.timestamps {
            for attribute in [CREATED_AT, UPDATED_AT] {
                if !merged.contains(attribute) {
                    merged.insert(attribute, AttributeConfig::timestamp());
                }
            }
        }
        let alias_maps = validate_model_schema(&merged, &name)?;

        let key_schema = merged.subset(keys.primary_key());
        let key_alias_maps = AliasMaps::from_schema(&key_schema);

        debug!(model = %name, table = %table_name, hash_key = %keys.hash_key, "model created");

        Ok(Self {
            name,
            table_name,
            client,
            keys,
            schema: merged,
            alias_maps,
            key_schema,
            key_alias_maps,
            io: IoOptions {
                allow_unknown_attributes: options.allow_unknown_attributes,
                transform_item: options.transform_item,
                validate_item: options.validate_item,
            },
            timestamps: options.timestamps,
            retry: options.retry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn keys(&self) -> &TableKeys {
        &self.keys
    }

    /// The merged schema: key attributes first, then the model's own.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs the full toDB pipeline.
    pub fn to_db(&self, item: Item) -> Result<Item> {
        pipeline::run(item, TO_DB_STEPS, &self.context(Direction::ToDb))
    }

    /// Runs the fromDB pipeline.
    pub fn from_db(&self, item: Item) -> Result<Item> {
        pipeline::run(item, FROM_DB_STEPS, &self.context(Direction::FromDb))
    }

    fn key_to_db(&self, keys: Item) -> Result<Item> {
        let ctx = IoContext::new(
            &self.key_schema,
            Some(&self.keys),
            &self.key_alias_maps,
            Direction::ToDb,
            &self.name,
            &self.io,
        );
        pipeline::run(keys, KEY_STEPS, &ctx)
    }

    fn context(&self, direction: Direction) -> IoContext<'_> {
        IoContext::new(
            &self.schema,
            Some(&self.keys),
            &self.alias_maps,
            direction,
            &self.name,
            &self.io,
        )
    }

    /// Sets timestamp attributes the caller did not supply, under their
    /// external names so the pipeline sees them like any other input.
    fn stamp(&self, mut item: Item, attributes: &[&str]) -> Item {
        if self.timestamps {
            let now = Value::Timestamp(Utc::now());
            for attribute in attributes {
                let external = self.alias_maps.display_name(attribute);
                if !item.contains_key(external) {
                    item.insert(external, now.clone());
                }
            }
        }
        item
    }

    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn get(&self, keys: Item) -> Result<Option<Item>> {
        let key = self.key_to_db(keys)?;
        match self.client.get(&self.table_name, key).await? {
            Some(item) => Ok(Some(self.from_db(item)?)),
            None => Ok(None),
        }
    }

    /// Reads many items by key, in chunks of [`BATCH_READ_SIZE`]. Keys the
    /// store leaves unprocessed are retried per chunk. Result order is not
    /// guaranteed.
    #[instrument(skip_all, fields(model = %self.name, keys = keys.len()))]
    pub async fn batch_get(&self, keys: Vec<Item>) -> Result<Vec<Item>> {
        let keys = keys
            .into_iter()
            .map(|key| self.key_to_db(key))
            .collect::<Result<Vec<_>>>()?;

        let found = Mutex::new(Vec::new());
        let found_ref = &found;
        let chunks = keys.chunks(BATCH_READ_SIZE).map(|chunk| {
            retry::run(
                move |pending: Vec<Item>| async move {
                    let output = self.client.batch_get(&self.table_name, pending).await?;
                    found_ref
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(output.items);
                    Ok::<_, Error>(output.unprocessed_keys)
                },
                chunk.to_vec(),
                &self.retry,
            )
        });
        try_join_all(chunks).await?;

        found
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .map(|item| self.from_db(item))
            .collect()
    }

    /// Writes a new item. Fails if an item with the same hash key exists.
    ///
    /// The store does not echo conditional writes, so the result is the
    /// written item passed back through the fromDB pipeline.
    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn create(&self, item: Item) -> Result<Item> {
        let item = self.to_db(self.stamp(item, &[CREATED_AT, UPDATED_AT]))?;
        let condition = attribute_not_exists(&self.keys.hash_key);
        self.client
            .put(&self.table_name, item.clone(), Some(condition))
            .await?;
        info!("Item created in '{}'", self.table_name);
        self.from_db(item)
    }

    /// Writes an item, replacing any existing item with the same key.
    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn upsert(&self, item: Item) -> Result<Item> {
        let item = self.to_db(self.stamp(item, &[CREATED_AT, UPDATED_AT]))?;
        self.client.put(&self.table_name, item.clone(), None).await?;
        info!("Item upserted in '{}'", self.table_name);
        self.from_db(item)
    }

    pub async fn batch_upsert(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        Ok(self.batch_upsert_and_delete(Some(items), None).await?.upserted)
    }

    pub async fn batch_delete(&self, keys: Vec<Item>) -> Result<Vec<Item>> {
        Ok(self.batch_upsert_and_delete(None, Some(keys)).await?.deleted)
    }

    /// Puts and deletes in one request list, submitted in chunks of
    /// [`BATCH_WRITE_SIZE`]. Chunks are independent: a failing chunk does not
    /// undo the ones already written.
    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn batch_upsert_and_delete(
        &self,
        upsert: Option<Vec<Item>>,
        delete: Option<Vec<Item>>,
    ) -> Result<BatchWriteOutput> {
        if upsert.is_none() && delete.is_none() {
            return Err(Error::item_input(format!(
                "batch write on model {} needs items to upsert or keys to delete",
                self.name
            )));
        }

        let upserted = upsert
            .unwrap_or_default()
            .into_iter()
            .map(|item| self.to_db(self.stamp(item, &[CREATED_AT, UPDATED_AT])))
            .collect::<Result<Vec<_>>>()?;
        let deleted = delete
            .unwrap_or_default()
            .into_iter()
            .map(|key| self.key_to_db(key))
            .collect::<Result<Vec<_>>>()?;

        let requests: Vec<BatchRequest> = upserted
            .iter()
            .cloned()
            .map(BatchRequest::Put)
            .chain(deleted.iter().cloned().map(BatchRequest::Delete))
            .collect();

        let chunks = requests.chunks(BATCH_WRITE_SIZE).map(|chunk| {
            retry::run(
                |pending| self.client.batch_write(&self.table_name, pending),
                chunk.to_vec(),
                &self.retry,
            )
        });
        try_join_all(chunks).await?;

        info!(
            "Batch wrote {} item(s) and deleted {} item(s) in '{}'",
            upserted.len(),
            deleted.len(),
            self.table_name
        );

        Ok(BatchWriteOutput {
            upserted: upserted
                .into_iter()
                .map(|item| self.from_db(item))
                .collect::<Result<_>>()?,
            deleted: deleted
                .into_iter()
                .map(|key| self.from_db(key))
                .collect::<Result<_>>()?,
        })
    }

    /// Applies a partial update and returns the updated item.
    ///
    /// Only the supplied attributes are processed; defaults, the whole-item
    /// validator and the required check do not run. Key attributes cannot be
    /// updated.
    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn update(&self, keys: Item, update: Item, options: UpdateOptions) -> Result<Item> {
        let key = self.key_to_db(keys)?;
        let update = pipeline::run(
            self.stamp(update, &[UPDATED_AT]),
            UPDATE_STEPS,
            &self.context(Direction::ToDb),
        )?;

        if let Some(attribute) = update.keys().find(|name| self.keys.is_primary_key(name)) {
            return Err(Error::item_input(format!(
                "key attribute \"{}\" of model {} cannot be updated",
                self.alias_maps.display_name(attribute),
                self.name
            )));
        }

        let expression = build_update_expression(&update, options.nulls)?;
        let updated = self
            .client
            .update(&self.table_name, key, expression)
            .await?
            .ok_or_else(|| Error::MissingUpdateResult(self.table_name.clone()))?;
        info!("Item updated in '{}'", self.table_name);
        self.from_db(updated)
    }

    /// Deletes an item and returns it as it was, if it existed.
    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn delete(&self, keys: Item) -> Result<Option<Item>> {
        let key = self.key_to_db(keys)?;
        let deleted = self.client.delete(&self.table_name, key).await?;
        info!("Item deleted from '{}'", self.table_name);
        deleted.map(|item| self.from_db(item)).transpose()
    }

    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn query(&self, input: QueryInput) -> Result<Vec<Item>> {
        let QueryInput {
            where_clause,
            index_name,
            limit,
            scan_index_forward,
            consistent_read,
            key_condition_expression,
            filter_expression,
            expression_attribute_names,
            expression_attribute_values,
        } = input;

        let mut request = QueryRequest {
            table_name: self.table_name.clone(),
            index_name,
            key_condition_expression,
            filter_expression,
            expression_attribute_names,
            expression_attribute_values,
            limit,
            scan_index_forward,
            consistent_read,
        };

        if let Some(query) = where_clause {
            let query = query.map_attributes(|attribute| self.resolve_attribute(attribute))?;
            let condition = build_key_condition(&query)?;
            if request.index_name.is_none() {
                request.index_name = self.resolve_index(&query)?;
            }
            request.key_condition_expression = Some(condition.expression);
            request.expression_attribute_names.extend(condition.names);
            request.expression_attribute_values.extend(condition.values);
        }

        debug!(index = ?request.index_name, "querying '{}'", self.table_name);
        self.client
            .query(request)
            .await?
            .into_iter()
            .map(|item| self.from_db(item))
            .collect()
    }

    #[instrument(skip_all, fields(model = %self.name))]
    pub async fn scan(&self, input: ScanInput) -> Result<Vec<Item>> {
        let request = ScanRequest {
            table_name: self.table_name.clone(),
            index_name: input.index_name,
            filter_expression: input.filter_expression,
            expression_attribute_names: input.expression_attribute_names,
            expression_attribute_values: input.expression_attribute_values,
            limit: input.limit,
            consistent_read: input.consistent_read,
        };
        self.client
            .scan(request)
            .await?
            .into_iter()
            .map(|item| self.from_db(item))
            .collect()
    }

    /// The table this model expects, derived from its key attributes.
    pub fn table_definition(&self) -> Result<TableDefinition> {
        Ok(TableDefinition::new(&self.table_name, &self.keys, &self.schema)?)
    }

    /// Makes sure the table exists and is active.
    ///
    /// A missing table is created once when `setup.create_if_missing` is set
    /// and reported as [`Error::TableNotFound`] otherwise.
    pub async fn ensure_table(&self, setup: &TableSetup) -> Result<()> {
        match self.client.table_status(&self.table_name).await? {
            Some(TableStatus::Active) => {
                info!("Table '{}' exists", self.table_name);
                return Ok(());
            }
            Some(_) => {}
            None if setup.create_if_missing => {
                let mut definition = self.table_definition()?;
                if let Some(Throughput { read, write }) = setup.throughput {
                    definition = definition.with_throughput(read, write);
                }
                info!("Creating table '{}'", self.table_name);
                self.client.create_table(&definition).await?;
            }
            None => return Err(Error::TableNotFound(self.table_name.clone())),
        }

        for poll in 1..=setup.max_polls {
            sleep(setup.poll_interval).await;
            match self.client.table_status(&self.table_name).await? {
                Some(TableStatus::Active) => {
                    info!("Table '{}' is active", self.table_name);
                    return Ok(());
                }
                status => info!(
                    "Waiting for table '{}' to become active ({:?}, poll {}/{})",
                    self.table_name, status, poll, setup.max_polls
                ),
            }
        }

        Err(Error::TableNotReady {
            table: self.table_name.clone(),
            polls: setup.max_polls,
        })
    }

    /// Maps a where-query attribute (alias or name) to its stored name.
    fn resolve_attribute(&self, attribute: String) -> Result<String> {
        if let Some(name) = self.alias_maps.name_of(&attribute) {
            return Ok(name.to_string());
        }
        if self.schema.contains(&attribute) || self.io.allow_unknown_attributes.allows(&attribute)
        {
            return Ok(attribute);
        }
        Err(Error::item_input(format!(
            "unknown attribute \"{attribute}\" in model {}",
            self.name
        )))
    }

    /// Picks the index whose keys cover the queried attributes. `None` means
    /// the table's own primary key.
    fn resolve_index(&self, query: &WhereQuery) -> Result<Option<String>> {
        let covers = |hash: &str, range: Option<&str>| {
            query.attributes().any(|name| name == hash)
                && query
                    .attributes()
                    .all(|name| name == hash || Some(name) == range)
        };

        if covers(&self.keys.hash_key, self.keys.range_key.as_deref()) {
            return Ok(None);
        }
        if let Some(index) = self
            .keys
            .indexes
            .iter()
            .find(|index| covers(&index.hash_key, index.range_key.as_deref()))
        {
            debug!(index = %index.name, "resolved index for query");
            return Ok(Some(index.name.clone()));
        }
        Err(Error::invalid_expression(
            format!("no key or index of model {} matches the query attributes", self.name),
            query,
        ))
    }
}
