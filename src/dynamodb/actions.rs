//! The individual pipeline actions. Each one processes a single schema level
//! and hands container values to [`descend_into`] to repeat itself below.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::dynamodb::item::{from_epoch_seconds, to_epoch_seconds};
use crate::dynamodb::pipeline::{apply_nested, descend_into, Direction, IoContext};
use crate::dynamodb::types;
use crate::dynamodb::{AttributeType, DefaultValue, Error, Item, Result, Value};

/// Renames aliases to attribute names (toDB) or attribute names to aliases
/// (fromDB). Keys matching neither are rejected unless the model allows them.
pub fn alias_mapping(item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    let mut mapped = Item::new();

    for (key, value) in item {
        let name = match ctx.direction {
            Direction::ToDb => ctx
                .alias_maps
                .name_of(&key)
                .map(str::to_string)
                .or_else(|| ctx.schema.contains(&key).then(|| key.clone())),
            Direction::FromDb => ctx.schema.contains(&key).then(|| key.clone()),
        };

        let (target, value) = match name {
            Some(name) => {
                let value = match ctx.schema.get(&name) {
                    Some(config) => apply_nested(alias_mapping, value, config, &name, ctx)?,
                    None => value,
                };
                let target = match ctx.direction {
                    Direction::ToDb => name,
                    Direction::FromDb => ctx.display_name(&name).to_string(),
                };
                (target, value)
            }
            None if ctx.options.allow_unknown_attributes.allows(&key) => (key, value),
            None => {
                return Err(Error::item_input(format!(
                    "unknown attribute \"{key}\" in model {}",
                    ctx.model_name
                )))
            }
        };

        if mapped.contains_key(&target) {
            return Err(Error::item_input(format!(
                "attribute \"{target}\" is given more than once in model {}",
                ctx.model_name
            )));
        }
        mapped.insert(target, value);
    }

    Ok(mapped)
}

/// Fills absent or null attributes from their declared defaults.
///
/// Nested defaults only apply inside containers that already exist.
pub fn set_defaults(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        if item.get(name).map_or(true, Value::is_null) {
            if let Some(default) = &config.default {
                let value = match default {
                    DefaultValue::Static(value) => value.clone(),
                    DefaultValue::Generator(generate) => generate(ctx.root.unwrap_or(&item)),
                };
                item.insert(name, value);
            }
        }

        let is_container = matches!(item.get(name), Some(Value::Map(_) | Value::List(_)));
        if config.schema.is_none() || !is_container {
            continue;
        }

        let snapshot = ctx.root.is_none().then(|| item.clone());
        let scoped = snapshot.as_ref().map(|root| ctx.with_root(root));
        descend_into(set_defaults, &mut item, name, config, scoped.as_ref().unwrap_or(ctx))?;
    }
    Ok(item)
}

/// Applies per-attribute value transforms. Containers are transformed
/// outside-in on the way to the store and inside-out on the way back.
pub fn transform(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        let Some(value) = item.remove(name) else {
            continue;
        };
        if value.is_null() {
            item.insert(name, value);
            continue;
        }

        let own = config.transform.as_ref().and_then(|t| match ctx.direction {
            Direction::ToDb => t.to_db.as_ref(),
            Direction::FromDb => t.from_db.as_ref(),
        });

        let value = match ctx.direction {
            Direction::ToDb => {
                let value = match own {
                    Some(f) => f(value),
                    None => value,
                };
                apply_nested(transform, value, config, name, ctx)?
            }
            Direction::FromDb => {
                let value = apply_nested(transform, value, config, name, ctx)?;
                match own {
                    Some(f) => f(value),
                    None => value,
                }
            }
        };
        item.insert(name, value);
    }
    Ok(item)
}

/// Applies the model's whole-item transform for the current direction.
pub fn transform_item(item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    if !ctx.is_top_level() {
        return Ok(item);
    }
    let transform = match ctx.direction {
        Direction::ToDb => ctx.options.transform_item.to_db.as_ref(),
        Direction::FromDb => ctx.options.transform_item.from_db.as_ref(),
    };
    Ok(match transform {
        Some(f) => f(item),
        None => item,
    })
}

/// Rejects present, non-null values that do not match their declared type.
pub fn type_check(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        let Some(value) = item.get(name).filter(|v| !v.is_null()) else {
            continue;
        };
        if !types::matches_type(value, config) {
            return Err(Error::item_input(format!(
                "Invalid type of value for property \"{}\" in model {}: expected {}, received {}",
                ctx.display_name(name),
                ctx.model_name,
                types::expected(config),
                value.kind()
            )));
        }
        descend_into(type_check, &mut item, name, config, ctx)?;
    }
    Ok(item)
}

/// Runs per-attribute validators against present, non-null values.
pub fn validate(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        let Some(value) = item.get(name).filter(|v| !v.is_null()) else {
            continue;
        };
        if let Some(validator) = &config.validate {
            if !validator(value).map_err(Error::Validator)? {
                return Err(Error::item_input(format!(
                    "Invalid value for property \"{}\" in model {}: validation failed",
                    ctx.display_name(name),
                    ctx.model_name
                )));
            }
        }
        descend_into(validate, &mut item, name, config, ctx)?;
    }
    Ok(item)
}

/// Runs the model's whole-item validator.
pub fn validate_item(item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    if !ctx.is_top_level() {
        return Ok(item);
    }
    if let Some(validator) = &ctx.options.validate_item {
        if !validator(&item).map_err(Error::Validator)? {
            return Err(Error::item_input(format!(
                "Invalid item for model {}: validation failed",
                ctx.model_name
            )));
        }
    }
    Ok(item)
}

/// Converts timestamps to epoch seconds and back; decodes base64 text that a
/// client returned for a binary attribute. Anything else passes through.
pub fn native_types(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        let Some(value) = item.remove(name) else {
            continue;
        };
        let converted = match (ctx.direction, config.attr_type, value) {
            (Direction::ToDb, Some(AttributeType::Timestamp), Value::Timestamp(ts)) => {
                Value::Number(to_epoch_seconds(&ts))
            }
            (Direction::FromDb, Some(AttributeType::Timestamp), Value::Number(seconds)) => {
                from_epoch_seconds(seconds).map_or(Value::Number(seconds), Value::Timestamp)
            }
            (Direction::FromDb, Some(AttributeType::Binary), Value::String(text)) => {
                match BASE64.decode(text.as_bytes()) {
                    Ok(bytes) => Value::Binary(bytes),
                    Err(_) => Value::String(text),
                }
            }
            (_, _, value) => value,
        };
        item.insert(name, converted);
        descend_into(native_types, &mut item, name, config, ctx)?;
    }
    Ok(item)
}

/// Rejects missing required attributes and nulls on non-nullable attributes.
pub fn required_check(mut item: Item, ctx: &IoContext<'_>) -> Result<Item> {
    for &(name, config) in &ctx.entries {
        let present = item.get(name);
        if present.is_none() && config.is_required() {
            return Err(Error::item_input(format!(
                "value required for property \"{}\" in model {}",
                ctx.display_name(name),
                ctx.model_name
            )));
        }
        if present.is_some_and(Value::is_null) && !config.nullable {
            return Err(Error::item_input(format!(
                "non-null value required for property \"{}\" in model {}",
                ctx.display_name(name),
                ctx.model_name
            )));
        }
        descend_into(required_check, &mut item, name, config, ctx)?;
    }
    Ok(item)
}
