//! Flattened key identities for batched indexing
//!
//! An [`Identity`] is the ordered list of key columns a batch is indexed by.
//! It is derived once, from the first key mapping of the batch, and every
//! other source key and every found row is flattened through the same
//! identity, so two mappings holding the same values always produce the same
//! index string regardless of the order their columns were inserted in.
//!
//! The flattened form is `col:value` pairs joined by tabs, with every value
//! coerced to its key string ([`Value::to_key_string`]) so that `1`, `1.0`
//! and `"1"` land in the same slot.

use crate::value::{Row, Value};
use crate::{Result, TideError};

/// Ordered key columns of one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    columns: Vec<String>,
}

impl Identity {
    /// Fix the column order from a key mapping.
    ///
    /// # Example
    ///
    /// ```
    /// use tideline::row;
    /// use tideline::relation::Identity;
    ///
    /// let identity = Identity::of(&row! { "type" => 1, "code" => 100 });
    /// assert_eq!(identity.arity(), 2);
    /// let key = identity.flatten("members", &row! { "code" => "100", "type" => 1 })?;
    /// assert_eq!(key, "type:1\tcode:100");
    /// # Ok::<(), tideline::TideError>(())
    /// ```
    pub fn of(keys: &Row) -> Self {
        Self {
            columns: keys.keys().cloned().collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Flatten `data` in identity order.
    ///
    /// # Errors
    ///
    /// `MissingKey` naming `table` when `data` lacks one of the columns.
    pub fn flatten(&self, table: &str, data: &Row) -> Result<String> {
        let parts = self
            .columns
            .iter()
            .map(|column| {
                data.get(column)
                    .map(|value| format!("{column}:{}", value.to_key_string()))
                    .ok_or_else(|| TideError::missing_key(table, column))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join("\t"))
    }

    /// Project `data` onto the identity columns, in identity order.
    pub fn project(&self, table: &str, data: &Row) -> Result<Row> {
        self.columns
            .iter()
            .map(|column| {
                data.get(column)
                    .map(|value: &Value| (column.clone(), value.clone()))
                    .ok_or_else(|| TideError::missing_key(table, column))
            })
            .collect()
    }
}
