use std::fmt;
use std::sync::Arc;

use crate::dynamodb::{Item, Value};

/// The kind of value an attribute holds.
///
/// Container kinds (`Map`, `Array`, `Tuple`) must be paired with a matching
/// [`NestedSchema`]; `Enum` must be paired with a non-empty `one_of` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Binary,
    Timestamp,
    Map,
    Array,
    Tuple,
    Enum,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
            AttributeType::Binary => "binary",
            AttributeType::Timestamp => "timestamp",
            AttributeType::Map => "map",
            AttributeType::Array => "array",
            AttributeType::Tuple => "tuple",
            AttributeType::Enum => "enum",
        }
    }

    /// Only strings, numbers and binary values may be used as keys.
    pub fn is_key_type(&self) -> bool {
        matches!(
            self,
            AttributeType::String | AttributeType::Number | AttributeType::Binary
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the values held by a container attribute.
#[derive(Debug, Clone)]
pub enum NestedSchema {
    /// Attributes of a `map`.
    Map(Schema),
    /// The config every element of an `array` conforms to.
    Array(Box<AttributeConfig>),
    /// One config per position of a `tuple`.
    Tuple(Vec<AttributeConfig>),
}

impl NestedSchema {
    pub(crate) fn kind(&self) -> AttributeType {
        match self {
            NestedSchema::Map(_) => AttributeType::Map,
            NestedSchema::Array(_) => AttributeType::Array,
            NestedSchema::Tuple(_) => AttributeType::Tuple,
        }
    }
}

pub type DefaultFn = Arc<dyn Fn(&Item) -> Value + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type ValidateFn = Arc<dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync>;
pub type ItemTransformFn = Arc<dyn Fn(Item) -> Item + Send + Sync>;
pub type ItemValidateFn = Arc<dyn Fn(&Item) -> anyhow::Result<bool> + Send + Sync>;

/// Value used when an attribute is absent or null.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    /// Computed from the top-level item, which already holds every attribute
    /// visited before this one.
    Generator(DefaultFn),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// A pair of per-attribute value transforms, one per pipeline direction.
#[derive(Clone, Default)]
pub struct Transform {
    pub to_db: Option<TransformFn>,
    pub from_db: Option<TransformFn>,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("to_db", &self.to_db.is_some())
            .field("from_db", &self.from_db.is_some())
            .finish()
    }
}

/// Whole-item transforms, applied once per pass at the top level.
#[derive(Clone, Default)]
pub struct ItemTransform {
    pub to_db: Option<ItemTransformFn>,
    pub from_db: Option<ItemTransformFn>,
}

impl fmt::Debug for ItemTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemTransform")
            .field("to_db", &self.to_db.is_some())
            .field("from_db", &self.from_db.is_some())
            .finish()
    }
}

/// Attribute projection of a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// Provisioned throughput hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub read: i64,
    pub write: i64,
}

/// A secondary index partitioned on the attribute that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    pub name: String,
    pub range_key: Option<String>,
    pub projection: Projection,
    pub throughput: Option<Throughput>,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range_key: None,
            projection: Projection::All,
            throughput: None,
        }
    }

    pub fn range_key(mut self, attribute: impl Into<String>) -> Self {
        self.range_key = Some(attribute.into());
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn throughput(mut self, read: i64, write: i64) -> Self {
        self.throughput = Some(Throughput { read, write });
        self
    }
}

/// Role an attribute plays in the table's key layout.
///
/// Only valid inside a table keys schema; merging into a model schema strips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRole {
    Hash,
    Range,
    Index(IndexConfig),
}

/// Declaration of a single attribute.
///
/// `attr_type` is optional so that a declaration missing its type can be
/// represented and rejected by schema validation.
#[derive(Clone, Default)]
pub struct AttributeConfig {
    pub attr_type: Option<AttributeType>,
    pub alias: Option<String>,
    pub schema: Option<NestedSchema>,
    pub one_of: Option<Vec<Value>>,
    pub default: Option<DefaultValue>,
    pub transform: Option<Transform>,
    pub validate: Option<ValidateFn>,
    pub nullable: bool,
    /// `None` means "not stated", which behaves as optional.
    pub required: Option<bool>,
    pub key: Option<KeyRole>,
}

impl fmt::Debug for AttributeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeConfig")
            .field("attr_type", &self.attr_type)
            .field("alias", &self.alias)
            .field("schema", &self.schema)
            .field("one_of", &self.one_of)
            .field("default", &self.default)
            .field("transform", &self.transform)
            .field("validate", &self.validate.is_some())
            .field("nullable", &self.nullable)
            .field("required", &self.required)
            .field("key", &self.key)
            .finish()
    }
}

impl AttributeConfig {
    pub fn of_type(attr_type: AttributeType) -> Self {
        Self {
            attr_type: Some(attr_type),
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::of_type(AttributeType::String)
    }

    pub fn number() -> Self {
        Self::of_type(AttributeType::Number)
    }

    pub fn boolean() -> Self {
        Self::of_type(AttributeType::Boolean)
    }

    pub fn binary() -> Self {
        Self::of_type(AttributeType::Binary)
    }

    pub fn timestamp() -> Self {
        Self::of_type(AttributeType::Timestamp)
    }

    pub fn map(schema: Schema) -> Self {
        Self {
            schema: Some(NestedSchema::Map(schema)),
            ..Self::of_type(AttributeType::Map)
        }
    }

    pub fn array(element: AttributeConfig) -> Self {
        Self {
            schema: Some(NestedSchema::Array(Box::new(element))),
            ..Self::of_type(AttributeType::Array)
        }
    }

    pub fn tuple(elements: Vec<AttributeConfig>) -> Self {
        Self {
            schema: Some(NestedSchema::Tuple(elements)),
            ..Self::of_type(AttributeType::Tuple)
        }
    }

    pub fn enumeration(one_of: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            one_of: Some(one_of.into_iter().map(Into::into).collect()),
            ..Self::of_type(AttributeType::Enum)
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = Some(false);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_fn(mut self, f: impl Fn(&Item) -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Generator(Arc::new(f)));
        self
    }

    pub fn to_db(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform.get_or_insert_with(Transform::default).to_db = Some(Arc::new(f));
        self
    }

    pub fn from_db(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform.get_or_insert_with(Transform::default).from_db = Some(Arc::new(f));
        self
    }

    pub fn validate(
        mut self,
        f: impl Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }

    pub fn hash_key(mut self) -> Self {
        self.key = Some(KeyRole::Hash);
        self
    }

    pub fn range_key(mut self) -> Self {
        self.key = Some(KeyRole::Range);
        self
    }

    pub fn index(mut self, index: IndexConfig) -> Self {
        self.key = Some(KeyRole::Index(index));
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }
}

/// An ordered collection of attribute declarations.
///
/// Declaration order is preserved; it decides the order in which default
/// generators run.
///
/// # Example
///
/// ```
/// use dynamo_model::dynamodb::{AttributeConfig, Schema};
///
/// let schema = Schema::new()
///     .attribute("user_id", AttributeConfig::string().required())
///     .attribute("timestamp", AttributeConfig::timestamp())
///     .attribute("message", AttributeConfig::string());
/// assert_eq!(schema.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attributes: Vec<(String, AttributeConfig)>,
}

impl Schema {
    /// Creates a new empty `Schema`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an attribute, replacing an earlier declaration of the same name in place.
    pub fn attribute(mut self, name: impl Into<String>, config: AttributeConfig) -> Self {
        self.insert(name, config);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, config: AttributeConfig) {
        let name = name.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = config,
            None => self.attributes.push((name, config)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeConfig> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, config)| config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeConfig)> {
        self.attributes.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns a schema with only the named attributes, in the given order.
    pub fn subset<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Schema {
        let attributes = names
            .into_iter()
            .filter_map(|name| self.get(name).map(|c| (name.to_string(), c.clone())))
            .collect();
        Schema { attributes }
    }
}

impl FromIterator<(String, AttributeConfig)> for Schema {
    fn from_iter<I: IntoIterator<Item = (String, AttributeConfig)>>(iter: I) -> Self {
        let mut schema = Schema::new();
        for (name, config) in iter {
            schema.insert(name, config);
        }
        schema
    }
}

/// Key layout derived from a validated table keys schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableKeys {
    pub hash_key: String,
    pub range_key: Option<String>,
    pub indexes: Vec<IndexKeys>,
}

/// A secondary index resolved against the table keys schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeys {
    pub name: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub projection: Projection,
    pub throughput: Option<Throughput>,
}

impl TableKeys {
    /// Names of the primary key attributes, hash key first.
    pub fn primary_key(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash_key.as_str()).chain(self.range_key.as_deref())
    }

    /// Whether `name` is part of the table's primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key().any(|key| key == name)
    }
}
