//! Runtime guards for every supported attribute kind.

use crate::dynamodb::{AttributeConfig, AttributeType, NestedSchema, Value};

pub fn is_string(value: &Value) -> bool {
    matches!(value, Value::String(_))
}

pub fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(_))
}

pub fn is_boolean(value: &Value) -> bool {
    matches!(value, Value::Bool(_))
}

pub fn is_binary(value: &Value) -> bool {
    matches!(value, Value::Binary(_))
}

pub fn is_timestamp(value: &Value) -> bool {
    matches!(value, Value::Timestamp(_))
}

pub fn is_map(value: &Value) -> bool {
    matches!(value, Value::Map(_))
}

pub fn is_array(value: &Value) -> bool {
    matches!(value, Value::List(_))
}

/// A tuple is an array whose length equals the number of declared positions.
/// Element types are checked position by position when the type-check step
/// descends into the tuple.
pub fn is_tuple(value: &Value, positions: usize) -> bool {
    matches!(value, Value::List(values) if values.len() == positions)
}

pub fn is_enum(value: &Value, one_of: &[Value]) -> bool {
    one_of.contains(value)
}

/// Checks `value` against the declared kind of `config`.
///
/// Container shapes only have their outer kind checked here.
pub fn matches_type(value: &Value, config: &AttributeConfig) -> bool {
    let Some(attr_type) = config.attr_type else {
        return false;
    };
    match attr_type {
        AttributeType::String => is_string(value),
        AttributeType::Number => is_number(value),
        AttributeType::Boolean => is_boolean(value),
        AttributeType::Binary => is_binary(value),
        AttributeType::Timestamp => is_timestamp(value),
        AttributeType::Map => is_map(value),
        AttributeType::Array => is_array(value),
        AttributeType::Tuple => match &config.schema {
            Some(NestedSchema::Tuple(positions)) => is_tuple(value, positions.len()),
            _ => is_array(value),
        },
        AttributeType::Enum => is_enum(value, config.one_of.as_deref().unwrap_or_default()),
    }
}

/// Describes what `config` expects, for error messages.
pub fn expected(config: &AttributeConfig) -> String {
    match (config.attr_type, &config.schema, &config.one_of) {
        (Some(AttributeType::Tuple), Some(NestedSchema::Tuple(positions)), _) => {
            format!("tuple of length {}", positions.len())
        }
        (Some(AttributeType::Enum), _, Some(one_of)) => format!("one of {one_of:?}"),
        (Some(attr_type), _, _) => attr_type.to_string(),
        (None, _, _) => "a declared type".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamodb::Item;
    use chrono::Utc;

    #[test]
    fn test_scalar_predicates() {
        assert!(is_string(&Value::from("a")));
        assert!(!is_string(&Value::from(1)));
        assert!(is_number(&Value::from(1.5)));
        assert!(is_boolean(&Value::from(true)));
        assert!(is_binary(&Value::binary(vec![1, 2])));
        assert!(is_timestamp(&Value::from(Utc::now())));
        assert!(is_map(&Value::from(Item::new())));
        assert!(is_array(&Value::List(vec![])));
    }

    #[test]
    fn test_tuple_requires_exact_length() {
        let pair = Value::List(vec![Value::from(1), Value::from("a")]);
        assert!(is_tuple(&pair, 2));
        assert!(!is_tuple(&pair, 3));
    }

    #[test]
    fn test_enum_membership() {
        let config = AttributeConfig::enumeration(["red", "green"]);
        assert!(matches_type(&Value::from("red"), &config));
        assert!(!matches_type(&Value::from("blue"), &config));
    }
}
