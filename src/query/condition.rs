//! Filter conditions carried by a [`QuerySpec`](super::QuerySpec).
//!
//! A condition is a plain value tree. Key mappings become AND-ed equality
//! groups, lists of key mappings become OR-groups, and a sequence value
//! becomes an `IN` test. Column names may be qualified as `table.column`
//! when a query joins other tables.

use crate::value::{Row, Value};

/// WHERE-clause tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value` (`column IS NULL` when the value is null)
    Eq(String, Value),
    /// `column IN (values...)`; an empty list matches nothing
    In(String, Vec<Value>),
    /// Every child must hold; empty matches every row
    All(Vec<Condition>),
    /// At least one child must hold; empty matches nothing
    Any(Vec<Condition>),
    /// Matches no row at all
    Never,
}

impl Default for Condition {
    fn default() -> Self {
        Condition::always()
    }
}

impl Condition {
    /// Condition matching every row.
    pub fn always() -> Self {
        Condition::All(Vec::new())
    }

    pub fn never() -> Self {
        Condition::Never
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::In(column.into(), values)
    }

    /// Equality group over a key mapping.
    ///
    /// A value that is itself a sequence becomes an `IN` test.
    pub fn keys(keys: &Row) -> Self {
        let parts = keys
            .iter()
            .map(|(column, value)| match value.as_list() {
                Some(list) => Condition::In(column.clone(), list),
                None => Condition::Eq(column.clone(), value.clone()),
            })
            .collect::<Vec<_>>();
        match parts.len() {
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => Condition::All(parts),
        }
    }

    /// OR-composite over several key mappings sharing the same columns.
    ///
    /// Single-column keys collapse into one `IN` test; composite keys become
    /// an OR of AND-groups. An empty list yields [`Condition::Never`] so that
    /// "no keys" can never degrade into an unfiltered query.
    pub fn any_of_keys(list: &[Row]) -> Self {
        if list.is_empty() {
            return Condition::Never;
        }
        let single_column = list.iter().all(|keys| keys.len() == 1)
            && list
                .iter()
                .filter_map(|keys| keys.keys().next())
                .all(|column| Some(column) == list[0].keys().next());
        if single_column {
            if let Some(column) = list[0].keys().next() {
                let values = list
                    .iter()
                    .filter_map(|keys| keys.values().next().cloned())
                    .collect();
                return Condition::In(column.clone(), values);
            }
        }
        match list.len() {
            1 => Condition::keys(&list[0]),
            _ => Condition::Any(list.iter().map(Condition::keys).collect()),
        }
    }

    /// AND this condition with another, flattening nested `All` groups.
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::Never, _) | (_, Condition::Never) => Condition::Never,
            (Condition::All(left), other) if left.is_empty() => other,
            (this, Condition::All(right)) if right.is_empty() => this,
            (Condition::All(mut left), Condition::All(right)) => {
                left.extend(right);
                Condition::All(left)
            }
            (Condition::All(mut left), other) => {
                left.push(other);
                Condition::All(left)
            }
            (this, Condition::All(mut right)) => {
                right.insert(0, this);
                Condition::All(right)
            }
            (this, other) => Condition::All(vec![this, other]),
        }
    }

    /// True when this condition matches every row.
    pub fn is_always(&self) -> bool {
        match self {
            Condition::All(parts) => parts.iter().all(Condition::is_always),
            _ => false,
        }
    }

    /// Evaluate against a row; `lookup` resolves a (possibly qualified)
    /// column name to its value.
    pub fn matches<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        match self {
            Condition::Eq(column, Value::Null) => lookup(column).map_or(true, Value::is_null),
            Condition::Eq(column, value) => lookup(column).is_some_and(|v| v.loosely_eq(value)),
            Condition::In(column, values) => lookup(column)
                .is_some_and(|v| values.iter().any(|candidate| v.loosely_eq(candidate))),
            Condition::All(parts) => parts.iter().all(|part| part.matches(lookup)),
            Condition::Any(parts) => parts.iter().any(|part| part.matches(lookup)),
            Condition::Never => false,
        }
    }

    /// Evaluate against a plain row.
    pub fn matches_row(&self, row: &Row) -> bool {
        self.matches(&|column: &str| row.get(column))
    }
}

impl From<&Row> for Condition {
    fn from(keys: &Row) -> Self {
        if keys.is_empty() {
            Condition::always()
        } else {
            Condition::keys(keys)
        }
    }
}

impl From<Row> for Condition {
    fn from(keys: Row) -> Self {
        Condition::from(&keys)
    }
}
