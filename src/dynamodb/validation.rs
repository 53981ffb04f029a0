//! Schema validation and derivation of key metadata and alias maps.
//!
//! Every function here is pure. Schemas are validated once when a
//! [`Model`](crate::dynamodb::Model) is built and never change afterwards.

use std::collections::HashMap;

use tracing::debug;

use crate::dynamodb::types;
use crate::dynamodb::{
    AttributeConfig, AttributeType, DefaultValue, IndexKeys, KeyRole, NestedSchema, Schema,
    SchemaValidationError, TableKeys,
};

type SchemaResult<T> = std::result::Result<T, SchemaValidationError>;

/// Bidirectional attribute name / alias lookup for one schema level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMaps {
    pub name_to_alias: HashMap<String, String>,
    pub alias_to_name: HashMap<String, String>,
}

impl AliasMaps {
    /// Builds the maps without checking for collisions; see [`validate_model_schema`].
    pub fn from_schema(schema: &Schema) -> Self {
        let mut maps = AliasMaps::default();
        for (name, config) in schema.iter() {
            if let Some(alias) = &config.alias {
                maps.name_to_alias.insert(name.to_string(), alias.clone());
                maps.alias_to_name.insert(alias.clone(), name.to_string());
            }
        }
        maps
    }

    pub fn alias_of(&self, name: &str) -> Option<&str> {
        self.name_to_alias.get(name).map(String::as_str)
    }

    pub fn name_of(&self, alias: &str) -> Option<&str> {
        self.alias_to_name.get(alias).map(String::as_str)
    }

    /// The external name of an attribute: its alias if it has one.
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.alias_of(name).unwrap_or(name)
    }
}

/// Checks every attribute (recursively) for a legal type/companion pairing.
pub fn validate_attribute_types(schema: &Schema) -> SchemaResult<()> {
    validate_level(schema, None)
}

fn validate_level(schema: &Schema, parent: Option<&str>) -> SchemaResult<()> {
    for (name, config) in schema.iter() {
        let path = match parent {
            Some(parent) => format!("{parent}.{name}"),
            None => name.to_string(),
        };
        validate_attribute(&path, config)?;
    }
    Ok(())
}

fn validate_attribute(path: &str, config: &AttributeConfig) -> SchemaResult<()> {
    let attr_type = config
        .attr_type
        .ok_or_else(|| SchemaValidationError::attribute(path, "missing type"))?;

    match (attr_type, &config.schema) {
        (AttributeType::Map, Some(NestedSchema::Map(schema))) => {
            validate_level(schema, Some(path))?
        }
        (AttributeType::Array, Some(NestedSchema::Array(element))) => {
            validate_attribute(&format!("{path}[]"), element)?
        }
        (AttributeType::Tuple, Some(NestedSchema::Tuple(positions))) => {
            if positions.is_empty() {
                return Err(SchemaValidationError::attribute(
                    path,
                    "tuple schema must declare at least one position",
                ));
            }
            for (i, position) in positions.iter().enumerate() {
                validate_attribute(&format!("{path}[{i}]"), position)?;
            }
        }
        (AttributeType::Map | AttributeType::Array | AttributeType::Tuple, nested) => {
            return Err(SchemaValidationError::attribute(
                path,
                format!(
                    "{attr_type} attributes require a {attr_type} schema, found {}",
                    nested.as_ref().map_or("none", |n| n.kind().as_str())
                ),
            ));
        }
        (_, Some(nested)) => {
            return Err(SchemaValidationError::attribute(
                path,
                format!(
                    "a {} schema is only allowed on map, array and tuple attributes, not {attr_type}",
                    nested.kind()
                ),
            ));
        }
        (_, None) => {}
    }

    match (attr_type, &config.one_of) {
        (AttributeType::Enum, Some(one_of)) if !one_of.is_empty() => {}
        (AttributeType::Enum, _) => {
            return Err(SchemaValidationError::attribute(
                path,
                "enum attributes require a non-empty one_of list",
            ));
        }
        (_, Some(_)) => {
            return Err(SchemaValidationError::attribute(
                path,
                "one_of is only allowed on enum attributes",
            ));
        }
        _ => {}
    }

    if let Some(DefaultValue::Static(value)) = &config.default {
        if !types::matches_type(value, config) {
            return Err(SchemaValidationError::attribute(
                path,
                format!(
                    "default value of kind {} does not match declared type {}",
                    value.kind(),
                    types::expected(config)
                ),
            ));
        }
    }

    Ok(())
}

/// Validates a table keys schema and derives the table's key layout.
pub fn validate_table_keys(schema: &Schema) -> SchemaResult<TableKeys> {
    validate_attribute_types(schema)?;

    let mut hash_key: Option<&str> = None;
    let mut range_key: Option<&str> = None;
    let mut indexes: Vec<IndexKeys> = Vec::new();

    for (name, config) in schema.iter() {
        let role = config.key.as_ref().ok_or_else(|| {
            SchemaValidationError::attribute(
                name,
                "table key attributes must declare a hash, range or index role",
            )
        })?;

        if let Some(attr_type) = config.attr_type.filter(|t| !t.is_key_type()) {
            return Err(SchemaValidationError::attribute(
                name,
                format!("key attributes must be string, number or binary, found {attr_type}"),
            ));
        }
        if !config.is_required() {
            return Err(SchemaValidationError::attribute(
                name,
                "key attributes must be required",
            ));
        }

        match role {
            KeyRole::Hash => {
                if let Some(existing) = hash_key.replace(name) {
                    return Err(SchemaValidationError::attribute(
                        name,
                        format!("hash key already declared on \"{existing}\""),
                    ));
                }
            }
            KeyRole::Range => {
                if let Some(existing) = range_key.replace(name) {
                    return Err(SchemaValidationError::attribute(
                        name,
                        format!("range key already declared on \"{existing}\""),
                    ));
                }
            }
            KeyRole::Index(index) => {
                if indexes.iter().any(|i| i.name == index.name) {
                    return Err(SchemaValidationError::attribute(
                        name,
                        format!("duplicate index name \"{}\"", index.name),
                    ));
                }
                if let Some(index_range) = &index.range_key {
                    if index_range == name || !schema.contains(index_range) {
                        return Err(SchemaValidationError::attribute(
                            name,
                            format!(
                                "index \"{}\" range key \"{index_range}\" must be another declared key attribute",
                                index.name
                            ),
                        ));
                    }
                }
                indexes.push(IndexKeys {
                    name: index.name.clone(),
                    hash_key: name.to_string(),
                    range_key: index.range_key.clone(),
                    projection: index.projection.clone(),
                    throughput: index.throughput,
                });
            }
        }
    }

    let hash_key = hash_key.ok_or_else(|| {
        SchemaValidationError::table("exactly one hash key attribute is required")
    })?;

    Ok(TableKeys {
        hash_key: hash_key.to_string(),
        range_key: range_key.map(str::to_string),
        indexes,
    })
}

/// Merges key attributes into a model schema.
///
/// A model may override a key attribute's alias, default, transform and
/// validator. Restating its type or requiredness with a different value is a
/// conflict. Key role markers are dropped from the result. Key attributes come
/// first, in table keys order, followed by the model's own attributes.
pub fn merge_table_keys_into_model_schema(
    table_keys: &Schema,
    model_schema: &Schema,
) -> SchemaResult<Schema> {
    let mut merged = Schema::new();

    for (name, key_config) in table_keys.iter() {
        let mut config = key_config.clone();
        config.key = None;

        if let Some(overrides) = model_schema.get(name) {
            if overrides.attr_type.is_some() && overrides.attr_type != key_config.attr_type {
                return Err(SchemaValidationError::attribute(
                    name,
                    "type conflicts with the table key declaration",
                ));
            }
            if overrides
                .required
                .is_some_and(|required| required != key_config.is_required())
            {
                return Err(SchemaValidationError::attribute(
                    name,
                    "required conflicts with the table key declaration",
                ));
            }
            if overrides.key.is_some() {
                return Err(SchemaValidationError::attribute(
                    name,
                    "key roles can only be declared in the table keys schema",
                ));
            }
            if overrides.alias.is_some() {
                config.alias = overrides.alias.clone();
            }
            if overrides.default.is_some() {
                config.default = overrides.default.clone();
            }
            if overrides.transform.is_some() {
                config.transform = overrides.transform.clone();
            }
            if overrides.validate.is_some() {
                config.validate = overrides.validate.clone();
            }
        }

        merged.insert(name, config);
    }

    for (name, config) in model_schema.iter() {
        if !table_keys.contains(name) {
            merged.insert(name, config.clone());
        }
    }

    Ok(merged)
}

/// Validates a model schema and builds its top-level alias maps.
pub fn validate_model_schema(schema: &Schema, model_name: &str) -> SchemaResult<AliasMaps> {
    validate_attribute_types(schema)?;
    check_model_level(schema, None, model_name)?;
    debug!(model = model_name, attributes = schema.len(), "validated model schema");
    Ok(AliasMaps::from_schema(schema))
}

fn check_model_level(schema: &Schema, parent: Option<&str>, model_name: &str) -> SchemaResult<()> {
    let mut taken: HashMap<&str, &str> = schema.names().map(|name| (name, name)).collect();

    for (name, config) in schema.iter() {
        let path = match parent {
            Some(parent) => format!("{parent}.{name}"),
            None => name.to_string(),
        };

        if config.key.is_some() {
            return Err(SchemaValidationError::attribute(
                path,
                format!("key roles are not allowed in the schema of model {model_name}"),
            ));
        }

        if let Some(alias) = config.alias.as_deref() {
            if let Some(owner) = taken.get(alias).filter(|owner| **owner != name) {
                return Err(SchemaValidationError::attribute(
                    path,
                    format!(
                        "alias \"{alias}\" is already used by \"{owner}\" in model {model_name}"
                    ),
                ));
            }
            taken.insert(alias, name);
        }

        match &config.schema {
            Some(NestedSchema::Map(nested)) => {
                check_model_level(nested, Some(&path), model_name)?
            }
            Some(NestedSchema::Array(element)) => {
                check_element(element, &format!("{path}[]"), model_name)?
            }
            Some(NestedSchema::Tuple(positions)) => {
                for (i, position) in positions.iter().enumerate() {
                    check_element(position, &format!("{path}[{i}]"), model_name)?;
                }
            }
            None => {}
        }
    }
    Ok(())
}

fn check_element(config: &AttributeConfig, path: &str, model_name: &str) -> SchemaResult<()> {
    if config.key.is_some() {
        return Err(SchemaValidationError::attribute(
            path,
            format!("key roles are not allowed in the schema of model {model_name}"),
        ));
    }
    match &config.schema {
        Some(NestedSchema::Map(nested)) => check_model_level(nested, Some(path), model_name),
        Some(NestedSchema::Array(element)) => {
            check_element(element, &format!("{path}[]"), model_name)
        }
        Some(NestedSchema::Tuple(positions)) => positions
            .iter()
            .enumerate()
            .try_for_each(|(i, p)| check_element(p, &format!("{path}[{i}]"), model_name)),
        None => Ok(()),
    }
}

/// Orders a schema's attributes for traversal: hash key, range key, index
/// partition keys, then everything else in declaration order.
///
/// Default generators rely on this order to read key values set earlier in
/// the same pass.
pub fn schema_entries<'a>(
    schema: &'a Schema,
    keys: Option<&TableKeys>,
) -> Vec<(&'a str, &'a AttributeConfig)> {
    let mut entries: Vec<(&'a str, &'a AttributeConfig)> = Vec::with_capacity(schema.len());

    if let Some(keys) = keys {
        let leading = keys
            .primary_key()
            .chain(keys.indexes.iter().map(|index| index.hash_key.as_str()));
        for key in leading {
            if entries.iter().any(|(name, _)| *name == key) {
                continue;
            }
            if let Some(entry) = schema.iter().find(|(name, _)| *name == key) {
                entries.push(entry);
            }
        }
    }

    for entry in schema.iter() {
        if !entries.iter().any(|(name, _)| *name == entry.0) {
            entries.push(entry);
        }
    }
    entries
}
