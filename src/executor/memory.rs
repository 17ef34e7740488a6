//! In-process table store.
//!
//! `MemoryExecutor` evaluates [`QuerySpec`]s directly over rows held in memory
//! and records every statement it runs, which makes it the backend of choice
//! for tests that assert on query counts ("one query per hop") or on the
//! exact payload of an `UPDATE`.
//!
//! Transactions are snapshot based: `begin` pushes a copy of every table,
//! `rollback` restores it and `commit` discards it. Nested `begin` calls
//! behave like savepoints.

use super::{Executor, Statement};
use crate::query::{Order, QuerySpec};
use crate::transaction::IsolationLevel;
use crate::value::{Row, Value};
use crate::{Result, TideError};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    auto_column: Option<String>,
    next_id: i64,
    last_id: Option<i64>,
}

impl Table {
    fn bump_past(&mut self, row: &Row) {
        if let Some(id) = self
            .auto_column
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(Value::as_i64)
        {
            self.next_id = self.next_id.max(id + 1);
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: IndexMap<String, Table>,
    snapshots: Vec<IndexMap<String, Table>>,
    history: Vec<Statement>,
}

impl State {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| TideError::Executor(format!("relation \"{name}\" does not exist")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| TideError::Executor(format!("relation \"{name}\" does not exist")))
    }

    /// Indexes of base rows matching `spec`, one entry per joined combination.
    fn matching(&self, spec: &QuerySpec, ordered: bool) -> Result<Vec<usize>> {
        let base = self.table(&spec.table)?;
        let mut frames: Vec<(usize, Vec<(&str, &Row)>)> = base
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| (index, vec![(spec.table.as_str(), row)]))
            .collect();

        for join in &spec.joins {
            let joined = self.table(&join.table)?;
            frames = frames
                .into_iter()
                .flat_map(|(index, frame)| {
                    let base_row = frame[0].1;
                    joined
                        .rows
                        .iter()
                        .filter(|candidate| {
                            join.on.iter().all(|(local, foreign)| {
                                match (base_row.get(local), candidate.get(foreign)) {
                                    (Some(a), Some(b)) => a.loosely_eq(b),
                                    _ => false,
                                }
                            })
                        })
                        .map(|candidate| {
                            let mut extended = frame.clone();
                            extended.push((join.table.as_str(), candidate));
                            (index, extended)
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        frames.retain(|(_, frame)| {
            spec.condition
                .matches(&|column: &str| lookup(frame, column))
        });

        if ordered && !spec.order.is_empty() {
            frames.sort_by(|(_, a), (_, b)| {
                spec.order
                    .iter()
                    .map(|(column, order)| {
                        let left = lookup(a, column).unwrap_or(&NULL);
                        let right = lookup(b, column).unwrap_or(&NULL);
                        match order {
                            Order::Asc => left.compare(right),
                            Order::Desc => right.compare(left),
                        }
                    })
                    .find(|ordering| *ordering != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let mut indexes: Vec<usize> = frames.into_iter().map(|(index, _)| index).collect();
        if ordered {
            if let Some(limit) = spec.limit {
                indexes.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
        }
        Ok(indexes)
    }
}

static NULL: Value = Value::Null;

/// Resolve a possibly qualified column against a joined frame.
fn lookup<'a>(frame: &[(&str, &'a Row)], column: &str) -> Option<&'a Value> {
    match column.split_once('.') {
        Some((table, name)) => frame
            .iter()
            .find(|(candidate, _)| *candidate == table)
            .and_then(|(_, row)| row.get(name)),
        None => frame.iter().find_map(|(_, row)| row.get(column)),
    }
}

/// In-memory [`Executor`]
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    state: Mutex<State>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `name` (if missing) with an optional auto-increment column.
    pub fn create_table(&self, name: &str, auto_column: Option<&str>) {
        let mut state = self.state();
        let table = state.tables.entry(name.to_string()).or_insert_with(|| Table {
            next_id: 1,
            ..Table::default()
        });
        table.auto_column = auto_column.map(str::to_string);
        let rows = table.rows.clone();
        for row in &rows {
            table.bump_past(row);
        }
    }

    /// Add fixture rows without recording statements.
    ///
    /// The table is created when missing; its auto-increment counter moves
    /// past every seeded id.
    pub fn seed(&self, name: &str, rows: Vec<Row>) {
        let mut state = self.state();
        let table = state.tables.entry(name.to_string()).or_insert_with(|| Table {
            next_id: 1,
            ..Table::default()
        });
        for row in rows {
            table.bump_past(&row);
            table.rows.push(row);
        }
    }

    /// Current rows of a table (empty when the table does not exist)
    pub fn rows(&self, name: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(name)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Every statement executed so far, oldest first
    pub fn statements(&self) -> Vec<Statement> {
        self.state().history.clone()
    }

    /// Number of `SELECT`/`COUNT` statements executed so far
    pub fn query_count(&self) -> usize {
        self.state().history.iter().filter(|s| s.is_query()).count()
    }

    pub fn clear_history(&self) {
        self.state().history.clear();
    }

    /// True while at least one `begin` is unmatched.
    pub fn in_transaction(&self) -> bool {
        !self.state().snapshots.is_empty()
    }
}

impl Executor for MemoryExecutor {
    fn select(&self, spec: &QuerySpec) -> Result<Vec<Row>> {
        let mut state = self.state();
        state.history.push(Statement::Select {
            table: spec.table.clone(),
            condition: spec.condition.clone(),
        });
        let indexes = state.matching(spec, true)?;
        let table = state.table(&spec.table)?;
        Ok(indexes.into_iter().map(|i| table.rows[i].clone()).collect())
    }

    fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let mut state = self.state();
        state.history.push(Statement::Count {
            table: spec.table.clone(),
            condition: spec.condition.clone(),
        });
        Ok(state.matching(spec, false)?.len() as u64)
    }

    fn insert(&self, name: &str, data: &Row) -> Result<bool> {
        let mut state = self.state();
        state.history.push(Statement::Insert {
            table: name.to_string(),
            data: data.clone(),
        });
        if data.is_empty() {
            return Err(TideError::InvalidArgument(format!(
                "no columns to insert into {name}"
            )));
        }
        let table = state.table_mut(name)?;
        let mut row = data.clone();
        if let Some(column) = table.auto_column.clone() {
            let assigned = match row.get(&column) {
                Some(value) if !value.is_null() => value.as_i64(),
                _ => {
                    let id = table.next_id;
                    row.insert(column, Value::Int(id));
                    Some(id)
                }
            };
            if let Some(id) = assigned {
                table.next_id = table.next_id.max(id + 1);
                table.last_id = Some(id);
            }
        }
        table.rows.push(row);
        Ok(true)
    }

    fn update(&self, spec: &QuerySpec, data: &Row) -> Result<u64> {
        let mut state = self.state();
        state.history.push(Statement::Update {
            table: spec.table.clone(),
            condition: spec.condition.clone(),
            data: data.clone(),
        });
        if data.is_empty() {
            return Err(TideError::InvalidArgument(format!(
                "no columns to update on {}",
                spec.table
            )));
        }
        let indexes = state.matching(spec, false)?;
        let table = state.table_mut(&spec.table)?;
        for &index in &indexes {
            for (column, value) in data {
                table.rows[index].insert(column.clone(), value.clone());
            }
        }
        Ok(indexes.len() as u64)
    }

    fn delete(&self, spec: &QuerySpec) -> Result<u64> {
        let mut state = self.state();
        state.history.push(Statement::Delete {
            table: spec.table.clone(),
            condition: spec.condition.clone(),
        });
        let mut indexes = state.matching(spec, false)?;
        indexes.sort_unstable();
        indexes.dedup();
        let table = state.table_mut(&spec.table)?;
        for &index in indexes.iter().rev() {
            table.rows.remove(index);
        }
        Ok(indexes.len() as u64)
    }

    fn last_id(&self, name: &str, column: &str) -> Result<Value> {
        let mut state = self.state();
        state.history.push(Statement::LastId {
            table: name.to_string(),
            column: column.to_string(),
        });
        let table = state.table(name)?;
        if table.auto_column.as_deref() != Some(column) {
            return Err(TideError::Executor(format!(
                "column \"{column}\" of \"{name}\" is not auto-increment"
            )));
        }
        Ok(table.last_id.map(Value::Int).unwrap_or(Value::Null))
    }

    fn begin(&self, _isolation: IsolationLevel) -> Result<()> {
        let mut state = self.state();
        state.history.push(Statement::Begin);
        let snapshot = state.tables.clone();
        state.snapshots.push(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state();
        state.history.push(Statement::Commit);
        state
            .snapshots
            .pop()
            .map(|_| ())
            .ok_or_else(|| TideError::IllegalState("commit without an open transaction".into()))
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state();
        state.history.push(Statement::Rollback);
        let snapshot = state.snapshots.pop().ok_or_else(|| {
            TideError::IllegalState("rollback without an open transaction".into())
        })?;
        state.tables = snapshot;
        Ok(())
    }
}
