//! # DynamoDB Models
//!
//! Schema-driven item mapping for Amazon DynamoDB.
//!
//! ## Components
//!
//! - `Schema` / `AttributeConfig`: declarative attribute definitions (types,
//!   aliases, defaults, transforms, validators, key roles).
//! - `validation`: checks schemas once and derives key metadata and alias maps.
//! - `pipeline`: the IO-Action pipeline every item passes through on its way
//!   to (toDB) and from (fromDB) the store.
//! - `expressions`: key condition, update and condition expression builders.
//! - `retry`: exponential backoff for partially processed batch requests.
//! - `Model`: binds all of the above to a table and a `DbClient`.
//! - `AwsDynamoDb`: the `DbClient` backed by the AWS SDK.
//!
//! ## Usage
//!
//! `AwsDynamoDb` reads its configuration the way the AWS SDK does:
//!
//! - `AWS_ACCESS_KEY_ID`: Your AWS access key ID.
//! - `AWS_SECRET_ACCESS_KEY`: Your AWS secret access key.
//! - `AWS_REGION`: The AWS region where your DynamoDB tables are located.
//! - `AWS_ENDPOINT_URL`: Optional, e.g. for DynamoDB Local.
//!
//! ## Example
//!
//! ```no_run
//! use dynamo_model::dynamodb::{
//!     AttributeConfig, AwsDynamoDb, IndexConfig, Item, Model, ModelConfig, QueryInput, Schema,
//!     WhereQuery,
//! };
//!
//! # async fn run() -> dynamo_model::dynamodb::Result<()> {
//! let sdk_config = aws_config::load_from_env().await;
//!
//! let keys = Schema::new()
//!     .attribute("category", AttributeConfig::string().required().hash_key())
//!     .attribute("product_name", AttributeConfig::string().required().range_key())
//!     .attribute(
//!         "sku",
//!         AttributeConfig::string()
//!             .required()
//!             .index(IndexConfig::new("sku-index")),
//!     );
//! let schema = Schema::new()
//!     .attribute("price", AttributeConfig::number().alias("cost"))
//!     .attribute("tags", AttributeConfig::array(AttributeConfig::string()));
//!
//! let products = Model::new(
//!     AwsDynamoDb::new(&sdk_config),
//!     ModelConfig::new("Product", "products", keys, schema),
//! )?;
//!
//! products
//!     .create(
//!         Item::new()
//!             .set("category", "tools")
//!             .set("product_name", "hammer")
//!             .set("sku", "T-100")
//!             .set("cost", 12.5),
//!     )
//!     .await?;
//!
//! let by_sku = products
//!     .query(QueryInput::where_clause(WhereQuery::new().value("sku", "T-100")))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod actions;
mod client;
mod error;
mod expressions;
mod item;
mod model;
pub mod pipeline;
pub mod retry;
mod schema;
mod table;
pub mod types;
pub mod validation;

pub use client::{
    AwsDynamoDb, BatchGetOutput, BatchRequest, DbClient, QueryRequest, ScanRequest, TableStatus,
};
pub use error::{Error, Result, SchemaValidationError, RETRYABLE_ERROR_CODES};
pub use expressions::{
    attribute_not_exists, build_key_condition, build_update_expression, Expression,
    NullHandling, Operator, WhereQuery, WhereValue,
};
pub use item::{Item, Value};
pub use model::{
    BatchWriteOutput, Model, ModelConfig, ModelOptions, QueryInput, ScanInput, UpdateOptions,
    BATCH_READ_SIZE, BATCH_WRITE_SIZE, CREATED_AT, UPDATED_AT,
};
pub use pipeline::{IoStep, UnknownAttributes};
pub use retry::RetryConfig;
pub use schema::{
    AttributeConfig, AttributeType, DefaultFn, DefaultValue, IndexConfig, IndexKeys,
    ItemTransform, ItemTransformFn, ItemValidateFn, KeyRole, NestedSchema, Projection, Schema,
    TableKeys, Throughput, Transform, TransformFn, ValidateFn,
};
pub use table::{IndexDefinition, KeyAttribute, TableDefinition, TableSetup};
