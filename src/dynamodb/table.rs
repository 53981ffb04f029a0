use tokio::time::Duration;

use crate::dynamodb::{
    AttributeType, Projection, Schema, SchemaValidationError, TableKeys, Throughput,
};

/// A key attribute the table has to declare up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    pub name: String,
    pub attr_type: AttributeType,
}

/// A global secondary index as created on the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub projection: Projection,
    pub throughput: Option<Throughput>,
}

/// Everything needed to create a model's table.
///
/// Derived from the validated table keys, so each key and index attribute
/// appears exactly once in `attributes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub table_name: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub attributes: Vec<KeyAttribute>,
    pub indexes: Vec<IndexDefinition>,
    /// `None` creates an on-demand table.
    pub throughput: Option<Throughput>,
}

impl TableDefinition {
    /// Builds the definition from the table's key layout and the schema that
    /// declares the key attribute types.
    pub fn new(
        table_name: impl Into<String>,
        keys: &TableKeys,
        schema: &Schema,
    ) -> Result<Self, SchemaValidationError> {
        let names = keys.primary_key().chain(
            keys.indexes.iter().flat_map(|index| {
                std::iter::once(index.hash_key.as_str()).chain(index.range_key.as_deref())
            }),
        );

        let mut attributes: Vec<KeyAttribute> = Vec::new();
        for name in names {
            if attributes.iter().any(|attribute| attribute.name == name) {
                continue;
            }
            let attr_type = schema
                .get(name)
                .and_then(|config| config.attr_type)
                .filter(AttributeType::is_key_type)
                .ok_or_else(|| {
                    SchemaValidationError::attribute(
                        name,
                        "key attributes must be string, number or binary",
                    )
                })?;
            attributes.push(KeyAttribute {
                name: name.to_string(),
                attr_type,
            });
        }

        let indexes = keys
            .indexes
            .iter()
            .map(|index| IndexDefinition {
                name: index.name.clone(),
                hash_key: index.hash_key.clone(),
                range_key: index.range_key.clone(),
                projection: index.projection.clone(),
                throughput: index.throughput,
            })
            .collect();

        Ok(Self {
            table_name: table_name.into(),
            hash_key: keys.hash_key.clone(),
            range_key: keys.range_key.clone(),
            attributes,
            indexes,
            throughput: None,
        })
    }

    /// Creates a provisioned table instead of an on-demand one.
    pub fn with_throughput(mut self, read: i64, write: i64) -> Self {
        self.throughput = Some(Throughput { read, write });
        self
    }
}

/// How [`Model::ensure_table`](crate::dynamodb::Model::ensure_table) treats a
/// missing or not yet active table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSetup {
    /// Create the table once when it does not exist; otherwise fail.
    pub create_if_missing: bool,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub throughput: Option<Throughput>,
}

impl Default for TableSetup {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
            throughput: None,
        }
    }
}
