use std::sync::Arc;

use anyhow::anyhow;
use chrono::{TimeZone, Utc};

use crate::dynamodb::pipeline::{
    self, Direction, IoContext, IoOptions, FROM_DB_STEPS, TO_DB_STEPS,
};
use crate::dynamodb::validation::AliasMaps;
use crate::dynamodb::{
    AttributeConfig, Error, Item, ItemTransform, Result, Schema, UnknownAttributes, Value,
};

fn run(schema: &Schema, item: Item, direction: Direction, options: &IoOptions) -> Result<Item> {
    let maps = AliasMaps::from_schema(schema);
    let ctx = IoContext::new(schema, None, &maps, direction, "Test", options);
    let steps = match direction {
        Direction::ToDb => TO_DB_STEPS,
        Direction::FromDb => FROM_DB_STEPS,
    };
    pipeline::run(item, steps, &ctx)
}

fn to_db(schema: &Schema, item: Item) -> Result<Item> {
    run(schema, item, Direction::ToDb, &IoOptions::default())
}

fn from_db(schema: &Schema, item: Item) -> Result<Item> {
    run(schema, item, Direction::FromDb, &IoOptions::default())
}

fn expect_item_input(result: Result<Item>, fragment: &str) {
    match result {
        Err(Error::ItemInput(message)) => {
            assert!(message.contains(fragment), "{message:?} lacks {fragment:?}")
        }
        other => panic!("expected item input error containing {fragment:?}, got {other:?}"),
    }
}

/// Wraps `config` under `levels` maps named `l0`, `l1`, ...
fn nest(config: AttributeConfig, levels: usize) -> Schema {
    let mut schema = Schema::new().attribute("value", config);
    for level in (0..levels).rev() {
        schema = Schema::new().attribute(format!("l{level}"), AttributeConfig::map(schema));
    }
    schema
}

fn nest_value(value: Value, levels: usize) -> Item {
    let mut item = Item::new().set("value", value);
    for level in (0..levels).rev() {
        item = Item::new().set(format!("l{level}"), item);
    }
    item
}

fn type_cases() -> Vec<(AttributeConfig, Value, Value)> {
    vec![
        (AttributeConfig::string(), Value::from("a"), Value::from(1)),
        (AttributeConfig::number(), Value::from(1), Value::from("1")),
        (AttributeConfig::boolean(), Value::from(true), Value::from("true")),
        (
            AttributeConfig::binary(),
            Value::binary(b"raw".to_vec()),
            Value::from(false),
        ),
        (
            AttributeConfig::timestamp(),
            Value::from(Utc::now()),
            Value::from("yesterday"),
        ),
        (
            AttributeConfig::map(Schema::new().attribute("city", AttributeConfig::string())),
            Value::from(Item::new().set("city", "Oslo")),
            Value::from("Oslo"),
        ),
        (
            AttributeConfig::array(AttributeConfig::number()),
            Value::List(vec![Value::from(1), Value::from(2)]),
            Value::from(1),
        ),
        (
            AttributeConfig::tuple(vec![AttributeConfig::string(), AttributeConfig::number()]),
            Value::List(vec![Value::from("x"), Value::from(1)]),
            Value::List(vec![Value::from("x")]),
        ),
        (
            AttributeConfig::enumeration(["red", "green"]),
            Value::from("red"),
            Value::from("blue"),
        ),
    ]
}

#[test]
fn test_type_check_each_type() {
    for (config, good, bad) in type_cases() {
        let schema = Schema::new().attribute("value", config);
        assert!(to_db(&schema, Item::new().set("value", good)).is_ok());
        expect_item_input(
            to_db(&schema, Item::new().set("value", bad)),
            "Invalid type of value",
        );
    }
}

#[test]
fn test_type_check_each_type_nested_five_deep() {
    for (config, good, bad) in type_cases() {
        let schema = nest(config, 5);
        assert!(to_db(&schema, nest_value(good, 5)).is_ok());
        expect_item_input(to_db(&schema, nest_value(bad, 5)), "Invalid type of value");
    }
}

#[test]
fn test_elements_are_type_checked() {
    let schema = Schema::new()
        .attribute("scores", AttributeConfig::array(AttributeConfig::number()))
        .attribute(
            "pair",
            AttributeConfig::tuple(vec![AttributeConfig::string(), AttributeConfig::number()]),
        );

    expect_item_input(
        to_db(
            &schema,
            Item::new().set("scores", vec![Value::from(1), Value::from("2")]),
        ),
        "Invalid type of value for property \"scores\"",
    );
    expect_item_input(
        to_db(
            &schema,
            Item::new().set("pair", vec![Value::from("a"), Value::from("b")]),
        ),
        "expected number",
    );
}

#[test]
fn test_round_trip_restores_item() {
    let schema = Schema::new()
        .attribute("id", AttributeConfig::string().alias("userId"))
        .attribute("born", AttributeConfig::timestamp())
        .attribute("avatar", AttributeConfig::binary())
        .attribute(
            "address",
            AttributeConfig::map(
                Schema::new()
                    .attribute("zip", AttributeConfig::string().alias("postcode"))
                    .attribute("moved", AttributeConfig::timestamp()),
            ),
        )
        .attribute(
            "visits",
            AttributeConfig::array(AttributeConfig::timestamp()),
        )
        .attribute("level", AttributeConfig::enumeration([1, 2, 3]));

    let born = Utc.timestamp_opt(631_152_000, 0).unwrap();
    let item = Item::new()
        .set("userId", "u-1")
        .set("born", born)
        .set("avatar", Value::binary(vec![0, 1, 2]))
        .set(
            "address",
            Item::new().set("postcode", "0150").set("moved", born),
        )
        .set("visits", vec![Value::from(born)])
        .set("level", 2);

    let stored = to_db(&schema, item.clone()).unwrap();
    assert_eq!(stored.get_string("id"), Some("u-1"));
    assert_eq!(stored.get_number("born"), Some(631_152_000.0));
    assert_eq!(
        stored.get("address").and_then(Value::as_map).unwrap().get_string("zip"),
        Some("0150")
    );
    assert_eq!(
        stored.get("visits"),
        Some(&Value::List(vec![Value::Number(631_152_000.0)]))
    );

    assert_eq!(from_db(&schema, stored).unwrap(), item);
}

#[test]
fn test_timestamps_store_whole_seconds() {
    let schema = Schema::new().attribute("at", AttributeConfig::timestamp());
    let at = Utc.timestamp_millis_opt(1_700_000_000_999).unwrap();
    let stored = to_db(&schema, Item::new().set("at", at)).unwrap();
    assert_eq!(stored.get_number("at"), Some(1_700_000_000.0));
}

#[test]
fn test_binary_from_base64_text() {
    let schema = Schema::new().attribute("blob", AttributeConfig::binary());
    let read = from_db(&schema, Item::new().set("blob", "aGVsbG8=")).unwrap();
    assert_eq!(read.get("blob"), Some(&Value::binary(b"hello".to_vec())));
}

#[test]
fn test_required_reports_alias() {
    let schema = Schema::new().attribute("pk", AttributeConfig::string().alias("id").required());
    expect_item_input(to_db(&schema, Item::new()), "required for property \"id\"");
    assert!(to_db(&schema, Item::new().set("id", "x")).is_ok());
}

#[test]
fn test_nulls_need_nullable() {
    let schema = Schema::new()
        .attribute("nickname", AttributeConfig::string())
        .attribute("middle_name", AttributeConfig::string().nullable());

    expect_item_input(
        to_db(&schema, Item::new().set("nickname", Value::Null)),
        "non-null value required for property \"nickname\"",
    );
    let stored = to_db(&schema, Item::new().set("middle_name", Value::Null)).unwrap();
    assert_eq!(stored.get("middle_name"), Some(&Value::Null));
}

#[test]
fn test_unknown_attributes() {
    let schema = Schema::new().attribute("name", AttributeConfig::string());
    let item = Item::new().set("name", "a").set("extra", 1);

    expect_item_input(to_db(&schema, item.clone()), "unknown attribute \"extra\"");

    let allow_all = IoOptions {
        allow_unknown_attributes: UnknownAttributes::Allow,
        ..IoOptions::default()
    };
    let stored = run(&schema, item.clone(), Direction::ToDb, &allow_all).unwrap();
    assert_eq!(stored.get_number("extra"), Some(1.0));

    let allow_listed = IoOptions {
        allow_unknown_attributes: UnknownAttributes::AllowOnly(vec!["other".into()]),
        ..IoOptions::default()
    };
    assert!(run(&schema, item, Direction::ToDb, &allow_listed).is_err());
}

#[test]
fn test_name_and_alias_together_is_duplicate() {
    let schema = Schema::new().attribute("id", AttributeConfig::string().alias("userId"));
    expect_item_input(
        to_db(&schema, Item::new().set("id", "a").set("userId", "b")),
        "more than once",
    );
}

#[test]
fn test_aliases_inside_array_elements() {
    let schema = Schema::new().attribute(
        "labels",
        AttributeConfig::array(AttributeConfig::map(
            Schema::new().attribute("text", AttributeConfig::string().alias("t")),
        )),
    );
    let item = Item::new().set("labels", vec![Value::from(Item::new().set("t", "sale"))]);

    let stored = to_db(&schema, item.clone()).unwrap();
    let labels = stored.get("labels").and_then(Value::as_list).unwrap();
    assert_eq!(labels[0].as_map().unwrap().get_string("text"), Some("sale"));
    assert_eq!(from_db(&schema, stored).unwrap(), item);
}

#[test]
fn test_defaults() {
    let schema = Schema::new()
        .attribute("id", AttributeConfig::string().default_value("generated"))
        .attribute(
            "slug",
            AttributeConfig::string().default_fn(|item| {
                Value::from(format!("slug-{}", item.get_string("id").unwrap_or("none")))
            }),
        )
        .attribute(
            "meta",
            AttributeConfig::map(Schema::new().attribute(
                "owner",
                AttributeConfig::string().default_fn(|root| {
                    root.get("id").cloned().unwrap_or(Value::Null)
                }),
            )),
        )
        .attribute("count", AttributeConfig::number().default_value(0));

    let stored = to_db(&schema, Item::new().set("meta", Item::new())).unwrap();
    assert_eq!(stored.get_string("id"), Some("generated"));
    assert_eq!(stored.get_string("slug"), Some("slug-generated"));
    assert_eq!(stored.get_number("count"), Some(0.0));
    assert_eq!(
        stored.get("meta").and_then(Value::as_map).unwrap().get_string("owner"),
        Some("generated")
    );

    let kept = to_db(&schema, Item::new().set("id", "mine").set("count", Value::Null)).unwrap();
    assert_eq!(kept.get_string("slug"), Some("slug-mine"));
    assert_eq!(kept.get_number("count"), Some(0.0));
    assert!(kept.get("meta").is_none());
}

#[test]
fn test_transform_order() {
    fn suffix(value: Value, tag: &str) -> Value {
        Value::from(format!("{}-{tag}", value.as_str().unwrap_or_default()))
    }

    let schema = Schema::new().attribute(
        "profile",
        AttributeConfig::map(Schema::new().attribute(
            "nick",
            AttributeConfig::string()
                .to_db(|v| Value::from(v.as_str().unwrap_or_default().to_lowercase()))
                .from_db(|v| suffix(v, "inner")),
        ))
        .to_db(|v| match v {
            Value::Map(item) => Value::Map(item.set("nick", "BOB")),
            other => other,
        })
        .from_db(|v| match v {
            Value::Map(mut item) => {
                let nick = item.remove("nick").unwrap_or(Value::Null);
                Value::Map(item.set("nick", suffix(nick, "outer")))
            }
            other => other,
        }),
    );

    let stored = to_db(&schema, Item::new().set("profile", Item::new())).unwrap();
    let profile = stored.get("profile").and_then(Value::as_map).unwrap();
    assert_eq!(profile.get_string("nick"), Some("bob"));

    let read = from_db(&schema, stored).unwrap();
    let profile = read.get("profile").and_then(Value::as_map).unwrap();
    assert_eq!(profile.get_string("nick"), Some("bob-inner-outer"));
}

#[test]
fn test_transforms_skip_nulls() {
    let schema = Schema::new().attribute(
        "name",
        AttributeConfig::string()
            .nullable()
            .to_db(|_| Value::from("changed")),
    );
    let stored = to_db(&schema, Item::new().set("name", Value::Null)).unwrap();
    assert_eq!(stored.get("name"), Some(&Value::Null));
}

#[test]
fn test_validators() {
    let schema = Schema::new()
        .attribute(
            "age",
            AttributeConfig::number().validate(|v| Ok(v.as_f64().is_some_and(|n| n >= 0.0))),
        )
        .attribute(
            "email",
            AttributeConfig::string().validate(|_| Err(anyhow!("validator offline"))),
        );

    assert!(to_db(&schema, Item::new().set("age", 3)).is_ok());
    expect_item_input(
        to_db(&schema, Item::new().set("age", -1)),
        "Invalid value for property \"age\"",
    );
    assert!(matches!(
        to_db(&schema, Item::new().set("email", "a@b.c")),
        Err(Error::Validator(_))
    ));
}

#[test]
fn test_item_level_hooks() {
    let schema = Schema::new()
        .attribute("first", AttributeConfig::string())
        .attribute("full", AttributeConfig::string());
    let options = IoOptions {
        transform_item: ItemTransform {
            to_db: Some(Arc::new(|item: Item| {
                let first = item.get_string("first").unwrap_or_default().to_string();
                item.set("full", format!("{first} Doe"))
            })),
            from_db: Some(Arc::new(|mut item: Item| {
                item.remove("full");
                item
            })),
        },
        validate_item: Some(Arc::new(|item: &Item| {
            Ok::<_, anyhow::Error>(item.get_string("first") != Some("Nobody"))
        })),
        ..IoOptions::default()
    };

    let stored = run(&schema, Item::new().set("first", "Jane"), Direction::ToDb, &options).unwrap();
    assert_eq!(stored.get_string("full"), Some("Jane Doe"));

    let read = run(&schema, stored, Direction::FromDb, &options).unwrap();
    assert!(read.get("full").is_none());

    expect_item_input(
        run(&schema, Item::new().set("first", "Nobody"), Direction::ToDb, &options),
        "Invalid item",
    );
}

#[test]
fn test_nesting_past_depth_limit_is_left_alone() {
    let levels = pipeline::MAX_DEPTH + 8;
    let schema = nest(AttributeConfig::number(), levels);
    let item = nest_value(Value::from("not a number"), levels);

    assert_eq!(to_db(&schema, item.clone()).unwrap(), item);
}
