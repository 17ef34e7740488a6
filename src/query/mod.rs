//! Query specs and the `Query` handle.
//!
//! A [`QuerySpec`] is an immutable description of a statement target:
//! table, WHERE tree, joins, ordering and limit. [`Query`] pairs a spec with
//! the executor that will run it and (optionally) the repository that
//! hydrates result rows into entities. Every builder call returns a modified
//! copy, so a query can be branched freely; only the terminal methods
//! (`find`, `select`, `count`, `insert`, `update`, `delete`, `last_id`)
//! touch the connection.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tideline::{row, MemoryExecutor, Order, Query};
//!
//! let db = Arc::new(MemoryExecutor::new());
//! db.create_table("users", Some("id"));
//! let users = Query::new(db, "users");
//! users.insert(&row! { "name" => "Alice" })?;
//!
//! let found = users.order_by("name", Order::Asc).find(&row! { "name" => "Alice" })?;
//! assert_eq!(found.len(), 1);
//! # Ok::<(), tideline::TideError>(())
//! ```

pub mod condition;
pub mod sql;

pub use condition::Condition;

use crate::entity::Entity;
use crate::executor::Executor;
use crate::metrics::observe;
use crate::repository::Repository;
use crate::value::{Row, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// `INNER JOIN table ON base.local = table.foreign ...`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    /// Base-table column to joined-table column
    pub on: IndexMap<String, String>,
}

/// Immutable statement target
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub table: String,
    pub condition: Condition,
    pub joins: Vec<JoinClause>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<u64>,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Copy of this spec with `condition` AND-ed in.
    pub fn filtered(&self, condition: Condition) -> Self {
        let mut spec = self.clone();
        spec.condition = std::mem::take(&mut spec.condition).and(condition);
        spec
    }
}

/// A query spec bound to an executor and an optional hydration target.
#[derive(Clone)]
pub struct Query {
    executor: Arc<dyn Executor>,
    spec: QuerySpec,
    hydration: Option<Repository>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("spec", &self.spec)
            .field(
                "hydration",
                &self.hydration.as_ref().map(|repo| repo.table().to_string()),
            )
            .finish()
    }
}

impl Query {
    /// Create a query scoped to `table`
    pub fn new(executor: Arc<dyn Executor>, table: impl Into<String>) -> Self {
        Self {
            executor,
            spec: QuerySpec::new(table),
            hydration: None,
        }
    }

    /// A fresh query on another table sharing this query's executor.
    ///
    /// Conditions, joins, ordering and the hydration target are reset.
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.executor), table)
    }

    /// Hydrate result rows as entities of `repository` (the fetch mode).
    pub fn with_hydration(mut self, repository: Repository) -> Self {
        self.hydration = Some(repository);
        self
    }

    /// AND a condition into the WHERE clause
    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.spec = self.spec.filtered(condition.into());
        self
    }

    /// Add an ORDER BY clause
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.spec.order.push((column.into(), order));
        self
    }

    /// Add an inner join; `on` pairs a base-table column with a column of `table`.
    pub fn join(mut self, table: impl Into<String>, on: &[(&str, &str)]) -> Self {
        self.spec.joins.push(JoinClause {
            table: table.into(),
            on: on
                .iter()
                .map(|(local, foreign)| (local.to_string(), foreign.to_string()))
                .collect(),
        });
        self
    }

    /// Add a LIMIT clause
    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn table(&self) -> &str {
        &self.spec.table
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Raw rows matching the spec plus `keys` (empty `keys` adds no filter).
    pub fn select(&self, keys: &Row) -> crate::Result<std::vec::IntoIter<Row>> {
        let spec = self.spec.filtered(Condition::from(keys));
        let rows = observe("select", &spec.table, || self.executor.select(&spec))?;
        log::debug!("select on {} returned {} row(s)", spec.table, rows.len());
        Ok(rows.into_iter())
    }

    /// Rows matching the spec plus `keys`, hydrated as entities.
    ///
    /// Without a hydration target the rows become detached entities with no
    /// primary keys.
    pub fn find(&self, keys: &Row) -> crate::Result<Vec<Entity>> {
        let rows = self.select(keys)?;
        match &self.hydration {
            Some(repository) => rows.map(|row| repository.hydrate(row)).collect(),
            None => rows
                .map(|row| Entity::hydrated(&self.spec.table, Vec::new(), row))
                .collect(),
        }
    }

    pub fn count(&self, keys: &Row) -> crate::Result<u64> {
        let spec = self.spec.filtered(Condition::from(keys));
        observe("count", &spec.table, || self.executor.count(&spec))
    }

    /// Insert one row into the query's table; `false` when nothing was inserted.
    pub fn insert(&self, data: &Row) -> crate::Result<bool> {
        observe("insert", &self.spec.table, || {
            self.executor.insert(&self.spec.table, data)
        })
    }

    /// Update rows matching the spec plus `keys`; returns the affected count.
    pub fn update(&self, keys: &Row, data: &Row) -> crate::Result<u64> {
        let spec = self.spec.filtered(Condition::from(keys));
        observe("update", &spec.table, || self.executor.update(&spec, data))
    }

    /// Delete rows matching the spec plus `keys`; returns the affected count.
    pub fn delete(&self, keys: &Row) -> crate::Result<u64> {
        let spec = self.spec.filtered(Condition::from(keys));
        observe("delete", &spec.table, || self.executor.delete(&spec))
    }

    /// Last auto-increment value generated for `column` of this table.
    pub fn last_id(&self, column: &str) -> crate::Result<Value> {
        observe("last_id", &self.spec.table, || {
            self.executor.last_id(&self.spec.table, column)
        })
    }
}
