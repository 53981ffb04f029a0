//! # IO-Action pipeline
//!
//! Items travel between the application and the store through an ordered list
//! of actions. Each action is a plain function `(Item, &IoContext) -> Result<Item>`;
//! the [`IoStep`] table maps step names to those functions, and callers pick
//! which steps run.
//!
//! toDB: alias mapping, set defaults, per-attribute transform, whole-item
//! transform, type check, per-attribute validate, whole-item validate,
//! native-type conversion, required/nullable check.
//!
//! fromDB: native-type conversion, per-attribute transform, whole-item
//! transform, alias mapping.
//!
//! Actions reach into maps, arrays and tuples through [`apply_nested`], which
//! re-invokes the action it is given against the nested schema.

use std::borrow::Cow;
use std::fmt;

use tracing::warn;

use crate::dynamodb::actions;
use crate::dynamodb::validation::{schema_entries, AliasMaps};
use crate::dynamodb::{
    AttributeConfig, Item, ItemTransform, ItemValidateFn, NestedSchema, Result, Schema, TableKeys,
    Value,
};

/// Nesting depth past which actions stop descending. Deeper values are left
/// untouched rather than rejected.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToDb,
    FromDb,
}

/// Policy for keys that are neither an attribute name nor an alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UnknownAttributes {
    #[default]
    Reject,
    Allow,
    AllowOnly(Vec<String>),
}

impl UnknownAttributes {
    pub fn allows(&self, key: &str) -> bool {
        match self {
            UnknownAttributes::Reject => false,
            UnknownAttributes::Allow => true,
            UnknownAttributes::AllowOnly(keys) => keys.iter().any(|k| k == key),
        }
    }
}

/// Per-model pipeline options, built once when the model is constructed.
#[derive(Clone, Default)]
pub struct IoOptions {
    pub allow_unknown_attributes: UnknownAttributes,
    pub transform_item: ItemTransform,
    pub validate_item: Option<ItemValidateFn>,
}

impl fmt::Debug for IoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoOptions")
            .field("allow_unknown_attributes", &self.allow_unknown_attributes)
            .field("transform_item", &self.transform_item)
            .field("validate_item", &self.validate_item.is_some())
            .finish()
    }
}

/// Everything an action needs to process one level of an item.
#[derive(Debug, Clone)]
pub struct IoContext<'a> {
    pub schema: &'a Schema,
    pub entries: Vec<(&'a str, &'a AttributeConfig)>,
    pub alias_maps: Cow<'a, AliasMaps>,
    pub direction: Direction,
    pub model_name: &'a str,
    pub options: &'a IoOptions,
    pub depth: usize,
    /// The top-level item, handed to default generators below the top level.
    pub root: Option<&'a Item>,
}

impl<'a> IoContext<'a> {
    pub fn new(
        schema: &'a Schema,
        keys: Option<&TableKeys>,
        alias_maps: &'a AliasMaps,
        direction: Direction,
        model_name: &'a str,
        options: &'a IoOptions,
    ) -> Self {
        Self {
            schema,
            entries: schema_entries(schema, keys),
            alias_maps: Cow::Borrowed(alias_maps),
            direction,
            model_name,
            options,
            depth: 0,
            root: None,
        }
    }

    /// Context for one level down, with `schema` substituted.
    pub fn descend<'b>(&'b self, schema: &'b Schema) -> IoContext<'b> {
        IoContext {
            schema,
            entries: schema_entries(schema, None),
            alias_maps: Cow::Owned(AliasMaps::from_schema(schema)),
            direction: self.direction,
            model_name: self.model_name,
            options: self.options,
            depth: self.depth + 1,
            root: self.root,
        }
    }

    pub fn with_root<'b>(&'b self, root: &'b Item) -> IoContext<'b> {
        IoContext {
            schema: self.schema,
            entries: self.entries.clone(),
            alias_maps: Cow::Borrowed(self.alias_maps.as_ref()),
            direction: self.direction,
            model_name: self.model_name,
            options: self.options,
            depth: self.depth,
            root: Some(root),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }

    /// External name of an attribute for error messages.
    pub fn display_name<'n>(&'n self, name: &'n str) -> &'n str {
        self.alias_maps.display_name(name)
    }
}

pub type IoAction = fn(Item, &IoContext<'_>) -> Result<Item>;

/// A named pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStep {
    AliasMapping,
    SetDefaults,
    Transform,
    TransformItem,
    TypeCheck,
    Validate,
    ValidateItem,
    NativeTypes,
    RequiredCheck,
}

impl IoStep {
    pub fn action(self) -> IoAction {
        match self {
            IoStep::AliasMapping => actions::alias_mapping,
            IoStep::SetDefaults => actions::set_defaults,
            IoStep::Transform => actions::transform,
            IoStep::TransformItem => actions::transform_item,
            IoStep::TypeCheck => actions::type_check,
            IoStep::Validate => actions::validate,
            IoStep::ValidateItem => actions::validate_item,
            IoStep::NativeTypes => actions::native_types,
            IoStep::RequiredCheck => actions::required_check,
        }
    }
}

pub const TO_DB_STEPS: &[IoStep] = &[
    IoStep::AliasMapping,
    IoStep::SetDefaults,
    IoStep::Transform,
    IoStep::TransformItem,
    IoStep::TypeCheck,
    IoStep::Validate,
    IoStep::ValidateItem,
    IoStep::NativeTypes,
    IoStep::RequiredCheck,
];

pub const FROM_DB_STEPS: &[IoStep] = &[
    IoStep::NativeTypes,
    IoStep::Transform,
    IoStep::TransformItem,
    IoStep::AliasMapping,
];

/// Partial updates: no defaults, no whole-item validation, no required check.
pub const UPDATE_STEPS: &[IoStep] = &[
    IoStep::AliasMapping,
    IoStep::Transform,
    IoStep::TransformItem,
    IoStep::TypeCheck,
    IoStep::Validate,
    IoStep::NativeTypes,
];

/// Key-only items, processed against the primary key attributes.
pub const KEY_STEPS: &[IoStep] = &[
    IoStep::AliasMapping,
    IoStep::Transform,
    IoStep::TypeCheck,
    IoStep::Validate,
    IoStep::NativeTypes,
    IoStep::RequiredCheck,
];

/// Runs `steps` over `item` in order.
pub fn run(item: Item, steps: &[IoStep], ctx: &IoContext<'_>) -> Result<Item> {
    steps
        .iter()
        .try_fold(item, |item, step| (step.action())(item, ctx))
}

/// Applies `action` to the contents of a container value.
///
/// Maps are processed directly against their nested schema. Each array or
/// tuple element is wrapped in a single-attribute item keyed by `name`,
/// processed against its element config, then unwrapped. Values whose shape
/// does not match the declared container pass through unchanged.
pub fn apply_nested(
    action: IoAction,
    value: Value,
    config: &AttributeConfig,
    name: &str,
    ctx: &IoContext<'_>,
) -> Result<Value> {
    if ctx.depth >= MAX_DEPTH {
        warn!(
            model = ctx.model_name,
            attribute = name,
            "nesting deeper than {MAX_DEPTH} levels left unprocessed"
        );
        return Ok(value);
    }

    match (&config.schema, value) {
        (Some(NestedSchema::Map(schema)), Value::Map(item)) => {
            Ok(Value::Map(action(item, &ctx.descend(schema))?))
        }
        (Some(NestedSchema::Array(element)), Value::List(values)) => {
            let wrapper = element_schema(name, element);
            let nested = ctx.descend(&wrapper);
            values
                .into_iter()
                .map(|value| apply_element(action, value, name, &nested))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        (Some(NestedSchema::Tuple(positions)), Value::List(values)) => values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match positions.get(i) {
                Some(position) => {
                    let wrapper = element_schema(name, position);
                    apply_element(action, value, name, &ctx.descend(&wrapper))
                }
                None => Ok(value),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (_, value) => Ok(value),
    }
}

/// Replaces the container stored under `name` with its processed contents.
pub(crate) fn descend_into(
    action: IoAction,
    item: &mut Item,
    name: &str,
    config: &AttributeConfig,
    ctx: &IoContext<'_>,
) -> Result<()> {
    if config.schema.is_none() {
        return Ok(());
    }
    if let Some(value) = item.remove(name) {
        let value = apply_nested(action, value, config, name, ctx)?;
        item.insert(name, value);
    }
    Ok(())
}

fn element_schema(name: &str, config: &AttributeConfig) -> Schema {
    let mut element = config.clone();
    element.alias = None;
    Schema::new().attribute(name, element)
}

fn apply_element(
    action: IoAction,
    value: Value,
    name: &str,
    ctx: &IoContext<'_>,
) -> Result<Value> {
    let mut wrapped = action(Item::new().set(name, value), ctx)?;
    Ok(wrapped.remove(name).unwrap_or(Value::Null))
}
