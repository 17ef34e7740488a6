//! Dynamic column values
//!
//! Entities are untyped records, so every column value is carried as a
//! [`Value`]. This module also provides the two views the relation engine
//! relies on:
//!
//! - **Key coercion** ([`Value::to_key_string`]) - every key value is turned
//!   into a string before it takes part in a flattened key, so that `1`,
//!   `1.0` and `"1"` index to the same slot.
//! - **Numeric view** ([`Value::as_f64`]) - used by collection aggregates,
//!   which refuse to coerce non-numeric values.

pub mod converter;

pub use converter::{Converter, ConverterRegistry};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single row: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// A dynamically typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`, also the "no value" sentinel returned for absent columns
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Arrays and objects; an array used in a key mapping means `IN`
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String form used when flattening key tuples.
    ///
    /// Integral floats render without a fractional part so that they collide
    /// with the equivalent integer. Numeric text renders like the number it
    /// spells, so `"1.0"`, `" 1"` and `1` share one key.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => "0".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_key(*f),
            Value::Text(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    i.to_string()
                } else if let Some(f) = trimmed.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    float_key(f)
                } else {
                    s.clone()
                }
            }
            Value::Json(j) => j.to_string(),
        }
    }

    /// Numeric view of the value.
    ///
    /// Integers, floats and numeric text are numeric; booleans, JSON and
    /// non-numeric text are not. `Null` has no numeric view either.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality as a SQL engine would apply it to a `col = value` filter.
    ///
    /// `NULL` never equals anything; everything else compares by key form,
    /// so a row matched here is found again under the same flattened key.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.to_key_string() == other.to_key_string()
    }

    /// Total ordering used for `ORDER BY` on in-memory rows; `NULL` sorts first.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => self.to_key_string().cmp(&other.to_key_string()),
            },
        }
    }

    /// Convert a JSON value, keeping scalars as native variants.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    /// Elements of a JSON array value, if this is one.
    pub(crate) fn as_list(&self) -> Option<Vec<Value>> {
        match self {
            Value::Json(serde_json::Value::Array(items)) => {
                Some(items.iter().cloned().map(Value::from_json).collect())
            }
            _ => None,
        }
    }

    /// Convert into the `sea_query` value bound as a statement parameter.
    pub fn to_sea_value(&self) -> sea_query::Value {
        match self {
            Value::Null => sea_query::Value::String(None),
            Value::Bool(b) => sea_query::Value::Bool(Some(*b)),
            Value::Int(i) => sea_query::Value::BigInt(Some(*i)),
            Value::Float(f) => sea_query::Value::Double(Some(*f)),
            Value::Text(s) => sea_query::Value::String(Some(s.clone())),
            Value::Json(j) => sea_query::Value::String(Some(j.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "'{s}'"),
            other => write!(f, "{}", other.to_key_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        let json = items
            .into_iter()
            .map(|item| {
                let value: Value = item.into();
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
            })
            .collect();
        Value::Json(serde_json::Value::Array(json))
    }
}

/// Build a [`Row`] from `column => value` pairs.
///
/// ```
/// use tideline::row;
///
/// let data = row! { "id" => 1, "name" => "Alice" };
/// assert_eq!(data.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        row
    }};
}

fn float_key(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}
