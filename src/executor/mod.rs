//! Statement execution
//!
//! [`Executor`] abstracts the store a [`Query`](crate::Query) runs against,
//! so repositories, relations and batched collectors work unchanged over any
//! implementation (the in-process [`MemoryExecutor`], the `PostgreSQL`
//! [`PostgresExecutor`], or a caller-provided one).
//!
//! Executors receive whole [`QuerySpec`]s rather than SQL text. SQL backends
//! render them with [`crate::query::sql`]; the memory backend evaluates them
//! directly.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod params;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryExecutor;
#[cfg(feature = "postgres")]
pub use postgres::PostgresExecutor;

use crate::query::{Condition, QuerySpec};
use crate::transaction::IsolationLevel;
use crate::value::{Row, Value};
use crate::Result;

/// Trait for executing statements against a backing store
///
/// Implementations must be shareable across coroutines; the crate holds them
/// as `Arc<dyn Executor>`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tideline::{row, Executor, MemoryExecutor, QuerySpec, Condition};
///
/// let db = MemoryExecutor::new();
/// db.create_table("users", Some("id"));
/// db.insert("users", &row! { "name" => "Alice" })?;
///
/// let spec = QuerySpec::new("users").filtered(Condition::eq("name", "Alice"));
/// assert_eq!(db.count(&spec)?, 1);
/// # Ok::<(), tideline::TideError>(())
/// ```
pub trait Executor: Send + Sync {
    /// Rows of `spec.table` matching the spec
    fn select(&self, spec: &QuerySpec) -> Result<Vec<Row>>;

    /// Number of rows matching the spec (LIMIT is ignored)
    fn count(&self, spec: &QuerySpec) -> Result<u64>;

    /// Insert one row
    ///
    /// # Returns
    ///
    /// `false` when the store reports that nothing was inserted.
    fn insert(&self, table: &str, data: &Row) -> Result<bool>;

    /// Update rows matching the spec; returns the affected row count
    fn update(&self, spec: &QuerySpec, data: &Row) -> Result<u64>;

    /// Delete rows matching the spec; returns the affected row count
    fn delete(&self, spec: &QuerySpec) -> Result<u64>;

    /// Last auto-increment value generated for `table.column` on this connection
    fn last_id(&self, table: &str, column: &str) -> Result<Value>;

    /// Open a transaction, or a savepoint when one is already open
    fn begin(&self, isolation: IsolationLevel) -> Result<()>;

    /// Commit the innermost open transaction or savepoint
    fn commit(&self) -> Result<()>;

    /// Roll back the innermost open transaction or savepoint
    fn rollback(&self) -> Result<()>;
}

/// A statement as recorded by [`MemoryExecutor`]
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select { table: String, condition: Condition },
    Count { table: String, condition: Condition },
    Insert { table: String, data: Row },
    Update { table: String, condition: Condition, data: Row },
    Delete { table: String, condition: Condition },
    LastId { table: String, column: String },
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    /// Table the statement targets, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Select { table, .. }
            | Statement::Count { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::LastId { table, .. } => Some(table),
            Statement::Begin | Statement::Commit | Statement::Rollback => None,
        }
    }

    /// True for statements that read rows (`SELECT` and `COUNT`).
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Select { .. } | Statement::Count { .. })
    }
}
