//! In-memory `DbClient` used by the model tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::dynamodb::{
    AttributeConfig, BatchGetOutput, BatchRequest, DbClient, Error, Expression, IndexConfig, Item,
    ModelConfig, ModelOptions, QueryRequest, Result, RetryConfig, ScanRequest, Schema,
    TableDefinition, TableStatus,
};

pub const TABLE: &str = "test-products";

/// Everything the mock has seen, plus scripted responses.
#[derive(Default)]
pub struct State {
    pub items: Vec<Item>,
    pub puts: Vec<(Item, Option<Expression>)>,
    pub updates: Vec<(Item, Expression)>,
    pub deletes: Vec<Item>,
    pub batch_writes: Vec<Vec<BatchRequest>>,
    pub batch_gets: Vec<Vec<Item>>,
    pub queries: Vec<QueryRequest>,
    pub scans: Vec<ScanRequest>,
    pub created_tables: Vec<TableDefinition>,
    /// Per batch call: how many trailing requests to leave unprocessed.
    pub unprocessed: VecDeque<usize>,
    /// Per batch call: an error code to fail with instead of processing.
    pub batch_failures: VecDeque<Option<&'static str>>,
    /// Successive `table_status` answers; empty means active.
    pub statuses: VecDeque<Option<TableStatus>>,
    /// Return no record from `update`.
    pub drop_update_result: bool,
}

pub struct MockClient {
    key_names: Vec<String>,
    state: Mutex<State>,
}

impl MockClient {
    pub fn new(key_names: &[&str]) -> Self {
        Self {
            key_names: key_names.iter().map(|k| k.to_string()).collect(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn key_of(&self, item: &Item) -> Item {
        item.project(self.key_names.iter().map(String::as_str))
    }

    fn position(&self, state: &State, key: &Item) -> Option<usize> {
        state.items.iter().position(|item| self.key_of(item) == *key)
    }

    fn store(&self, state: &mut State, item: Item) {
        let key = self.key_of(&item);
        match self.position(state, &key) {
            Some(i) => state.items[i] = item,
            None => state.items.push(item),
        }
    }

    /// Splits off the scripted unprocessed tail, or fails with a scripted code.
    fn split_batch<T>(state: &mut State, mut requests: Vec<T>) -> Result<(Vec<T>, Vec<T>)> {
        if let Some(Some(code)) = state.batch_failures.pop_front() {
            return Err(Error::client(Some(code), anyhow!("scripted failure")));
        }
        let unprocessed = state.unprocessed.pop_front().unwrap_or(0).min(requests.len());
        let rest = requests.split_off(requests.len() - unprocessed);
        Ok((requests, rest))
    }
}

#[async_trait]
impl DbClient for MockClient {
    async fn get(&self, _table: &str, key: Item) -> Result<Option<Item>> {
        let state = self.state();
        Ok(self.position(&state, &key).map(|i| state.items[i].clone()))
    }

    async fn batch_get(&self, _table: &str, keys: Vec<Item>) -> Result<BatchGetOutput> {
        let mut state = self.state();
        state.batch_gets.push(keys.clone());
        let (processed, unprocessed_keys) = Self::split_batch(&mut state, keys)?;
        let items = processed
            .iter()
            .filter_map(|key| self.position(&state, key).map(|i| state.items[i].clone()))
            .collect();
        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }

    async fn put(&self, _table: &str, item: Item, condition: Option<Expression>) -> Result<()> {
        let mut state = self.state();
        state.puts.push((item.clone(), condition.clone()));
        let conditional = condition
            .as_ref()
            .is_some_and(|c| c.expression.starts_with("attribute_not_exists"));
        if conditional && self.position(&state, &self.key_of(&item)).is_some() {
            return Err(Error::client(
                Some("ConditionalCheckFailedException"),
                anyhow!("The conditional request failed"),
            ));
        }
        self.store(&mut state, item);
        Ok(())
    }

    async fn update(&self, _table: &str, key: Item, update: Expression) -> Result<Option<Item>> {
        let mut state = self.state();
        state.updates.push((key.clone(), update.clone()));
        if state.drop_update_result {
            return Ok(None);
        }

        let mut item = match self.position(&state, &key) {
            Some(i) => state.items[i].clone(),
            None => key.clone(),
        };
        let (set, remove) = match update.expression.split_once(" REMOVE ") {
            Some((set, remove)) => (set, Some(remove)),
            None if update.expression.starts_with("REMOVE ") => {
                ("", update.expression.strip_prefix("REMOVE "))
            }
            None => (update.expression.as_str(), None),
        };
        for assignment in set.trim_start_matches("SET ").split(", ").filter(|a| !a.is_empty()) {
            let (name, value) = assignment.split_once(" = ").unwrap();
            item.insert(update.names[name].clone(), update.values[value].clone());
        }
        for name in remove.into_iter().flat_map(|r| r.split(", ")) {
            item.remove(&update.names[name]);
        }

        self.store(&mut state, item.clone());
        Ok(Some(item))
    }

    async fn delete(&self, _table: &str, key: Item) -> Result<Option<Item>> {
        let mut state = self.state();
        state.deletes.push(key.clone());
        Ok(self.position(&state, &key).map(|i| state.items.remove(i)))
    }

    async fn batch_write(
        &self,
        _table: &str,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<BatchRequest>> {
        let mut state = self.state();
        state.batch_writes.push(requests.clone());
        let (processed, unprocessed) = Self::split_batch(&mut state, requests)?;
        for request in processed {
            match request {
                BatchRequest::Put(item) => self.store(&mut state, item),
                BatchRequest::Delete(key) => {
                    if let Some(i) = self.position(&state, &key) {
                        state.items.remove(i);
                    }
                }
                BatchRequest::Get(_) => unreachable!("reads are never written"),
            }
        }
        Ok(unprocessed)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Item>> {
        let mut state = self.state();
        state.queries.push(request);
        Ok(state.items.clone())
    }

    async fn scan(&self, request: ScanRequest) -> Result<Vec<Item>> {
        let mut state = self.state();
        state.scans.push(request);
        Ok(state.items.clone())
    }

    async fn table_status(&self, _table: &str) -> Result<Option<TableStatus>> {
        Ok(self
            .state()
            .statuses
            .pop_front()
            .unwrap_or(Some(TableStatus::Active)))
    }

    async fn create_table(&self, definition: &TableDefinition) -> Result<()> {
        self.state().created_tables.push(definition.clone());
        Ok(())
    }
}

/// Table keys: `category` (hash), `product_name` (range) and a `sku` index.
pub fn product_keys() -> Schema {
    Schema::new()
        .attribute("category", AttributeConfig::string().required().hash_key())
        .attribute(
            "product_name",
            AttributeConfig::string().required().range_key(),
        )
        .attribute(
            "sku",
            AttributeConfig::string()
                .required()
                .index(IndexConfig::new("sku-index")),
        )
}

pub fn product_schema() -> Schema {
    Schema::new()
        .attribute("price", AttributeConfig::number().alias("cost"))
        .attribute("in_stock", AttributeConfig::boolean())
        .attribute("tags", AttributeConfig::array(AttributeConfig::string()))
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        disable_delay: true,
        ..RetryConfig::default()
    }
}

pub fn product_config(options: ModelOptions) -> ModelConfig {
    ModelConfig::new("Product", TABLE, product_keys(), product_schema()).options(ModelOptions {
        retry: fast_retry(),
        ..options
    })
}

pub fn product(category: &str, name: &str, sku: &str) -> Item {
    Item::new()
        .set("category", category)
        .set("product_name", name)
        .set("sku", sku)
}
