//! Query building blocks shared by the relational and document facades

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use super::adapter::dialect::check_ident;
use super::error::{DbError, Result};
use super::record::{is_zero, to_fields};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    /// Check a document field map against this condition
    pub fn matches(&self, fields: &serde_json::Map<String, Value>) -> bool {
        let actual = fields.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            CompareOp::Eq => values_equal(actual, &self.value),
            CompareOp::Ne => !values_equal(actual, &self.value),
            CompareOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            CompareOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            CompareOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Ordered list of conditions, all of which must hold (AND)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Eq, value)
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Ne, value)
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Gt, value)
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Gte, value)
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Lt, value)
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, CompareOp::Lte, value)
    }

    /// Equality filter from alternating `key, value, key, value, ...`.
    ///
    /// Odd-length lists and non-string keys are rejected.
    pub fn from_pairs(args: &[Value]) -> Result<Self> {
        if args.len() % 2 != 0 {
            return Err(DbError::InvalidArgument(format!(
                "filter pairs need an even number of arguments, got {}",
                args.len()
            )));
        }
        let mut filter = Self::new();
        for pair in args.chunks(2) {
            let key = pair[0].as_str().ok_or_else(|| {
                DbError::InvalidArgument(format!("filter key must be a string, got {}", pair[0]))
            })?;
            filter = filter.eq(key, pair[1].clone());
        }
        Ok(filter)
    }

    /// Like [`Filter::from_pairs`], except an odd-length list yields an
    /// empty filter instead of an error.
    pub fn from_pairs_lenient(args: &[Value]) -> Result<Self> {
        if args.len() % 2 != 0 {
            tracing::warn!(count = args.len(), "odd filter argument count, query runs unfiltered");
            return Ok(Self::new());
        }
        Self::from_pairs(args)
    }

    /// Equality on every non-zero field of `template`, in field order.
    pub fn from_template<T: Serialize>(template: &T) -> Result<Self> {
        let fields = to_fields(template)?;
        let mut filter = Self::new();
        for (key, value) in fields {
            if !is_zero(&value) {
                filter = filter.eq(&key, value);
            }
        }
        Ok(filter)
    }

    /// Conjunction of both filters
    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Check if a document matches every condition
    pub fn matches(&self, fields: &serde_json::Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| c.matches(fields))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self { column: column.to_string(), direction: SortDirection::Asc }
    }

    pub fn desc(column: &str) -> Self {
        Self { column: column.to_string(), direction: SortDirection::Desc }
    }

    /// Parse a sort expression such as `"name desc, id"`.
    pub fn parse(expr: &str) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        for term in expr.split(',') {
            let mut words = term.split_whitespace();
            let column = match words.next() {
                Some(c) => c,
                None => continue,
            };
            check_ident(column)?;
            let direction = match words.next().map(|w| w.to_ascii_lowercase()) {
                None => SortDirection::Asc,
                Some(w) if w == "asc" => SortDirection::Asc,
                Some(w) if w == "desc" => SortDirection::Desc,
                Some(w) => {
                    return Err(DbError::InvalidArgument(format!(
                        "unknown sort direction {:?} in {:?}",
                        w, expr
                    )))
                }
            };
            if words.next().is_some() {
                return Err(DbError::InvalidArgument(format!("malformed sort term {:?}", term.trim())));
            }
            out.push(Self { column: column.to_string(), direction });
        }
        Ok(out)
    }
}

/// Options for multi-record finds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default)]
    pub filter: Filter,

    #[serde(default)]
    pub order_by: Vec<OrderBy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default)]
    pub skip: u32,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Append the terms of a sort expression (see [`OrderBy::parse`]).
    pub fn sort(mut self, expr: &str) -> Result<Self> {
        self.order_by.extend(OrderBy::parse(expr)?);
        Ok(self)
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.skip = n;
        self
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // 1 and 1.0 are the same number
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Compare two JSON values
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
