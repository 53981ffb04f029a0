use crate::dynamodb::validation::{
    merge_table_keys_into_model_schema, schema_entries, validate_attribute_types,
    validate_model_schema, validate_table_keys,
};
use crate::dynamodb::{
    AttributeConfig, AttributeType, Error, IndexConfig, Model, ModelConfig, Projection, Schema,
    TableDefinition, Value,
};

use super::support::{product_config, product_keys, MockClient};

fn every_type() -> Schema {
    Schema::new()
        .attribute("name", AttributeConfig::string())
        .attribute("age", AttributeConfig::number())
        .attribute("active", AttributeConfig::boolean())
        .attribute("avatar", AttributeConfig::binary())
        .attribute("born", AttributeConfig::timestamp())
        .attribute(
            "address",
            AttributeConfig::map(Schema::new().attribute("city", AttributeConfig::string())),
        )
        .attribute("tags", AttributeConfig::array(AttributeConfig::string()))
        .attribute(
            "point",
            AttributeConfig::tuple(vec![AttributeConfig::number(), AttributeConfig::number()]),
        )
        .attribute("color", AttributeConfig::enumeration(["red", "green"]))
}

#[test]
fn test_all_types_validate() {
    assert!(validate_attribute_types(&every_type()).is_ok());
    assert!(validate_model_schema(&every_type(), "Everything").is_ok());
}

#[test]
fn test_missing_type_names_attribute() {
    let schema = Schema::new().attribute("name", AttributeConfig::default());
    let err = validate_attribute_types(&schema).unwrap_err();
    assert_eq!(err.attribute.as_deref(), Some("name"));
    assert!(err.rule.contains("missing type"));
}

#[test]
fn test_missing_type_in_nested_map_reports_path() {
    let schema = Schema::new().attribute(
        "address",
        AttributeConfig::map(Schema::new().attribute("city", AttributeConfig::default())),
    );
    let err = validate_attribute_types(&schema).unwrap_err();
    assert_eq!(err.attribute.as_deref(), Some("address.city"));
}

#[test]
fn test_containers_require_nested_schema() {
    for attr_type in [AttributeType::Map, AttributeType::Array, AttributeType::Tuple] {
        let schema = Schema::new().attribute("items", AttributeConfig::of_type(attr_type));
        let err = validate_attribute_types(&schema).unwrap_err();
        assert_eq!(err.attribute.as_deref(), Some("items"), "{attr_type}");
    }
}

#[test]
fn test_nested_schema_kind_must_match() {
    let mut config = AttributeConfig::array(AttributeConfig::string());
    config.attr_type = Some(AttributeType::Map);
    let schema = Schema::new().attribute("items", config);
    assert!(validate_attribute_types(&schema).is_err());

    let mut scalar = AttributeConfig::map(Schema::new());
    scalar.attr_type = Some(AttributeType::String);
    let schema = Schema::new().attribute("name", scalar);
    assert!(validate_attribute_types(&schema).is_err());
}

#[test]
fn test_enum_requires_values() {
    let schema =
        Schema::new().attribute("color", AttributeConfig::enumeration(Vec::<Value>::new()));
    let err = validate_attribute_types(&schema).unwrap_err();
    assert!(err.rule.contains("one_of"));

    let mut stray = AttributeConfig::string();
    stray.one_of = Some(vec![Value::from("a")]);
    assert!(validate_attribute_types(&Schema::new().attribute("name", stray)).is_err());
}

#[test]
fn test_static_default_must_match_type() {
    let schema = Schema::new().attribute("age", AttributeConfig::number().default_value("ten"));
    let err = validate_attribute_types(&schema).unwrap_err();
    assert_eq!(err.attribute.as_deref(), Some("age"));

    let schema = Schema::new().attribute("age", AttributeConfig::number().default_value(10));
    assert!(validate_attribute_types(&schema).is_ok());
}

#[test]
fn test_table_keys_layout() {
    let keys = validate_table_keys(&product_keys()).unwrap();
    assert_eq!(keys.hash_key, "category");
    assert_eq!(keys.range_key.as_deref(), Some("product_name"));
    assert_eq!(keys.indexes.len(), 1);
    assert_eq!(keys.indexes[0].name, "sku-index");
    assert_eq!(keys.indexes[0].hash_key, "sku");
    assert_eq!(keys.indexes[0].projection, Projection::All);
}

#[test]
fn test_table_keys_rules() {
    let no_hash = Schema::new().attribute("id", AttributeConfig::string().required().range_key());
    assert!(validate_table_keys(&no_hash).is_err());

    let two_hashes = Schema::new()
        .attribute("a", AttributeConfig::string().required().hash_key())
        .attribute("b", AttributeConfig::string().required().hash_key());
    assert!(validate_table_keys(&two_hashes).is_err());

    let no_role = Schema::new()
        .attribute("id", AttributeConfig::string().required().hash_key())
        .attribute("other", AttributeConfig::string().required());
    assert_eq!(
        validate_table_keys(&no_role).unwrap_err().attribute.as_deref(),
        Some("other")
    );

    let boolean_key =
        Schema::new().attribute("id", AttributeConfig::boolean().required().hash_key());
    assert!(validate_table_keys(&boolean_key).is_err());

    let optional_key = Schema::new().attribute("id", AttributeConfig::string().hash_key());
    assert!(validate_table_keys(&optional_key).is_err());

    let dangling_index_range = Schema::new()
        .attribute("id", AttributeConfig::string().required().hash_key())
        .attribute(
            "email",
            AttributeConfig::string()
                .required()
                .index(IndexConfig::new("by-email").range_key("missing")),
        );
    assert!(validate_table_keys(&dangling_index_range).is_err());
}

#[test]
fn test_merge_puts_keys_first_and_strips_roles() {
    let model = Schema::new()
        .attribute("price", AttributeConfig::number())
        .attribute("category", AttributeConfig::string().alias("kind"));
    let merged = merge_table_keys_into_model_schema(&product_keys(), &model).unwrap();

    let names: Vec<&str> = merged.names().collect();
    assert_eq!(names, ["category", "product_name", "sku", "price"]);
    assert!(merged.iter().all(|(_, config)| config.key.is_none()));
    assert_eq!(merged.get("category").unwrap().alias.as_deref(), Some("kind"));
    assert!(merged.get("category").unwrap().is_required());
}

#[test]
fn test_merge_rejects_conflicts() {
    let retyped = Schema::new().attribute("category", AttributeConfig::number());
    assert!(merge_table_keys_into_model_schema(&product_keys(), &retyped).is_err());

    let optional = Schema::new().attribute("category", AttributeConfig::string().optional());
    assert!(merge_table_keys_into_model_schema(&product_keys(), &optional).is_err());
}

#[test]
fn test_model_schema_rejects_key_roles() {
    let schema = Schema::new().attribute("id", AttributeConfig::string().required().hash_key());
    assert!(validate_model_schema(&schema, "User").is_err());

    let nested = Schema::new().attribute(
        "profile",
        AttributeConfig::map(
            Schema::new().attribute("id", AttributeConfig::string().required().range_key()),
        ),
    );
    let err = validate_model_schema(&nested, "User").unwrap_err();
    assert_eq!(err.attribute.as_deref(), Some("profile.id"));
}

#[test]
fn test_aliases_must_be_unique() {
    let duplicate = Schema::new()
        .attribute("first", AttributeConfig::string().alias("name"))
        .attribute("second", AttributeConfig::string().alias("name"));
    assert!(validate_model_schema(&duplicate, "User").is_err());

    let shadowing = Schema::new()
        .attribute("name", AttributeConfig::string())
        .attribute("full_name", AttributeConfig::string().alias("name"));
    assert!(validate_model_schema(&shadowing, "User").is_err());

    let maps = validate_model_schema(
        &Schema::new().attribute("id", AttributeConfig::string().alias("userId")),
        "User",
    )
    .unwrap();
    assert_eq!(maps.alias_of("id"), Some("userId"));
    assert_eq!(maps.name_of("userId"), Some("id"));
}

#[test]
fn test_entries_visit_keys_first() {
    let keys = validate_table_keys(&product_keys()).unwrap();
    let schema = Schema::new()
        .attribute("price", AttributeConfig::number())
        .attribute("sku", AttributeConfig::string())
        .attribute("product_name", AttributeConfig::string())
        .attribute("category", AttributeConfig::string());

    let order: Vec<&str> = schema_entries(&schema, Some(&keys))
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(order, ["category", "product_name", "sku", "price"]);
}

#[test]
fn test_model_construction_fails_on_bad_schema() {
    let mut config = product_config(Default::default());
    config.schema = config
        .schema
        .attribute("broken", AttributeConfig::of_type(AttributeType::Array));

    let err = Model::new(MockClient::new(&["category", "product_name"]), config).unwrap_err();
    assert!(matches!(
        err,
        Error::SchemaValidation(ref e) if e.attribute.as_deref() == Some("broken")
    ));
}

#[test]
fn test_table_definition_from_keys() {
    let model = Model::new(
        MockClient::new(&["category", "product_name"]),
        ModelConfig::new("Product", "products", product_keys(), Schema::new()),
    )
    .unwrap();
    let definition: TableDefinition = model.table_definition().unwrap();

    assert_eq!(definition.hash_key, "category");
    assert_eq!(definition.range_key.as_deref(), Some("product_name"));
    let attributes: Vec<&str> = definition.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(attributes, ["category", "product_name", "sku"]);
    assert_eq!(definition.indexes[0].name, "sku-index");
    assert!(definition.throughput.is_none());
}
