//! Builders for key condition, update and condition expressions.
//!
//! Placeholders are derived from attribute names (`#name`, `:name`) so the
//! same input always yields the same expression.

use std::collections::BTreeMap;

use tracing::debug;

use crate::dynamodb::{Error, Item, Result, Value};

/// An expression string with its placeholder maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    pub expression: String,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

/// Comparison operators allowed in a key condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    BeginsWith,
}

/// One attribute's condition: a bare value (shorthand for `Eq`) or an
/// operator object, which must hold exactly one operator.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    Scalar(Value),
    Operators(Vec<(Operator, Value)>),
}

/// Key conditions for a query, in insertion order.
///
/// ```
/// use dynamo_model::dynamodb::{build_key_condition, WhereQuery};
///
/// let query = WhereQuery::new().value("name", "Foo");
/// let expression = build_key_condition(&query).unwrap();
/// assert_eq!(expression.expression, "#name = :name");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereQuery {
    entries: Vec<(String, WhereValue)>,
}

impl WhereQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, attribute: impl Into<String>, condition: WhereValue) -> Self {
        self.entries.push((attribute.into(), condition));
        self
    }

    /// Shorthand equality.
    pub fn value(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(attribute, WhereValue::Scalar(value.into()))
    }

    pub fn op(
        self,
        attribute: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.condition(attribute, WhereValue::Operators(vec![(operator, value.into())]))
    }

    pub fn eq(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(attribute, Operator::Eq, value)
    }

    pub fn between(
        self,
        attribute: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Self {
        self.op(
            attribute,
            Operator::Between,
            Value::List(vec![lower.into(), upper.into()]),
        )
    }

    pub fn begins_with(self, attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.op(attribute, Operator::BeginsWith, Value::String(prefix.into()))
    }

    pub fn entries(&self) -> &[(String, WhereValue)] {
        &self.entries
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(attribute, _)| attribute.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renames attributes, keeping conditions and order.
    pub fn map_attributes(self, mut rename: impl FnMut(String) -> Result<String>) -> Result<Self> {
        let entries = self
            .entries
            .into_iter()
            .map(|(attribute, condition)| Ok((rename(attribute)?, condition)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

/// Turns a where-query into a key condition expression.
///
/// At most two distinct attributes, each with exactly one operator, and at
/// least one equality clause.
pub fn build_key_condition(query: &WhereQuery) -> Result<Expression> {
    if query.len() > 2 {
        return Err(Error::invalid_expression(
            "a key condition accepts at most two attributes",
            query,
        ));
    }

    let mut clauses = Vec::with_capacity(query.len());
    let mut out = Expression::default();
    let mut has_equality = false;

    for (attribute, condition) in query.entries() {
        let (operator, operand) = match condition {
            WhereValue::Scalar(value) => (Operator::Eq, value),
            WhereValue::Operators(ops) if ops.len() == 1 => (ops[0].0, &ops[0].1),
            WhereValue::Operators(ops) => {
                return Err(Error::invalid_expression(
                    format!("condition on \"{attribute}\" must have exactly one operator"),
                    ops,
                ));
            }
        };
        check_operand(attribute, operator, operand)?;

        if out.names.values().any(|taken| taken == attribute) {
            return Err(Error::invalid_expression(
                format!("attribute \"{attribute}\" appears more than once"),
                query,
            ));
        }
        let base = unique_base(attribute, |candidate| {
            out.names.contains_key(&format!("#{candidate}"))
                || ["", "LowerBound", "UpperBound"]
                    .iter()
                    .any(|suffix| out.values.contains_key(&format!(":{candidate}{suffix}")))
        });
        let name = format!("#{base}");
        out.names.insert(name.clone(), attribute.clone());

        let clause = match (operator, operand) {
            (Operator::Between, Value::List(bounds)) => {
                let lower = format!(":{base}LowerBound");
                let upper = format!(":{base}UpperBound");
                out.values.insert(lower.clone(), bounds[0].clone());
                out.values.insert(upper.clone(), bounds[1].clone());
                format!("{name} BETWEEN {lower} AND {upper}")
            }
            (Operator::BeginsWith, operand) => {
                let value = format!(":{base}");
                out.values.insert(value.clone(), operand.clone());
                format!("begins_with({name}, {value})")
            }
            (operator, operand) => {
                let value = format!(":{base}");
                out.values.insert(value.clone(), operand.clone());
                format!("{name} {} {value}", comparison(operator))
            }
        };

        has_equality |= operator == Operator::Eq;
        clauses.push(clause);
    }

    if !has_equality {
        return Err(Error::invalid_expression(
            "a key condition requires an equality clause",
            query,
        ));
    }

    out.expression = clauses.join(" AND ");
    debug!(expression = %out.expression, "built key condition");
    Ok(out)
}

fn comparison(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::Gt => ">",
        Operator::Gte => ">=",
        Operator::Between => "BETWEEN",
        Operator::BeginsWith => "begins_with",
    }
}

fn check_operand(attribute: &str, operator: Operator, operand: &Value) -> Result<()> {
    let valid = match operator {
        Operator::Eq | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            matches!(operand, Value::String(_) | Value::Number(_))
        }
        Operator::BeginsWith => matches!(operand, Value::String(_)),
        Operator::Between => match operand {
            Value::List(bounds) => matches!(
                bounds.as_slice(),
                [Value::String(_), Value::String(_)] | [Value::Number(_), Value::Number(_)]
            ),
            _ => false,
        },
    };
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_expression(
            format!("invalid operand for {operator:?} on \"{attribute}\""),
            operand,
        ))
    }
}

/// How `null` values in an update are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NullHandling {
    /// Remove the attribute from the stored item.
    #[default]
    Remove,
    /// Store an explicit null.
    Set,
}

/// Builds a `SET`/`REMOVE` update expression from a flat map of attribute values.
pub fn build_update_expression(update: &Item, nulls: NullHandling) -> Result<Expression> {
    let mut out = Expression::default();
    let mut set = Vec::new();
    let mut remove = Vec::new();

    for (attribute, value) in update.iter() {
        let base = unique_base(attribute, |candidate| {
            out.names.contains_key(&format!("#{candidate}"))
        });
        let name = format!("#{base}");
        out.names.insert(name.clone(), attribute.clone());

        if value.is_null() && nulls == NullHandling::Remove {
            remove.push(name);
        } else {
            let placeholder = format!(":{base}");
            out.values.insert(placeholder.clone(), value.clone());
            set.push(format!("{name} = {placeholder}"));
        }
    }

    let mut clauses = Vec::with_capacity(2);
    if !set.is_empty() {
        clauses.push(format!("SET {}", set.join(", ")));
    }
    if !remove.is_empty() {
        clauses.push(format!("REMOVE {}", remove.join(", ")));
    }
    if clauses.is_empty() {
        return Err(Error::invalid_expression(
            "an update needs at least one attribute",
            update,
        ));
    }

    out.expression = clauses.join(" ");
    debug!(expression = %out.expression, "built update expression");
    Ok(out)
}

/// Condition that succeeds only when no item with this hash key exists.
pub fn attribute_not_exists(attribute: &str) -> Expression {
    let name = format!("#{}", placeholder_base(attribute));
    Expression {
        expression: format!("attribute_not_exists({name})"),
        names: BTreeMap::from([(name, attribute.to_string())]),
        values: BTreeMap::new(),
    }
}

fn placeholder_base(attribute: &str) -> String {
    attribute
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn unique_base(attribute: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let base = placeholder_base(attribute);
    if !is_taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(base)
}
