//! Transaction Module
//!
//! A simple begin/commit/rollback wrapper over one or more executors.
//!
//! The relation and collector logic is transaction agnostic: open a
//! [`Transaction`] around a unit of work and everything executed through the
//! wrapped executors in between commits or rolls back together. Nothing is
//! coordinated beyond fanning the calls out in order (no two-phase commit).

use crate::executor::Executor;
use crate::{Result, TideError};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (not supported by PostgreSQL, maps to ReadCommitted)
    ReadUncommitted,
    /// Read committed (default)
    #[default]
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    /// Convert to PostgreSQL SQL syntax
    pub fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// An open transaction spanning one or more executors
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back and logs a warning.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tideline::{row, Executor, MemoryExecutor, Query, Transaction};
///
/// let db = Arc::new(MemoryExecutor::new());
/// db.create_table("users", Some("id"));
/// let users = Query::new(db.clone(), "users");
///
/// let tx = Transaction::begin(vec![db.clone() as Arc<dyn Executor>])?;
/// users.insert(&row! { "name" => "Alice" })?;
/// tx.rollback()?;
///
/// assert_eq!(users.count(&row! {})?, 0);
/// # Ok::<(), tideline::TideError>(())
/// ```
pub struct Transaction {
    executors: Vec<Arc<dyn Executor>>,
    closed: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("executors", &self.executors.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transaction {
    /// Begin a transaction on every executor with the default isolation level
    ///
    /// # Errors
    ///
    /// If any executor fails to begin, the ones already begun are rolled back
    /// and the first error is returned.
    pub fn begin(executors: Vec<Arc<dyn Executor>>) -> Result<Self> {
        Self::begin_with_isolation(executors, IsolationLevel::default())
    }

    /// Begin a transaction on every executor with `isolation`
    pub fn begin_with_isolation(
        executors: Vec<Arc<dyn Executor>>,
        isolation: IsolationLevel,
    ) -> Result<Self> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        for (started, executor) in executors.iter().enumerate() {
            if let Err(e) = executor.begin(isolation) {
                for begun in &executors[..started] {
                    if let Err(rollback_err) = begun.rollback() {
                        log::warn!("rollback after failed begin also failed: {rollback_err}");
                    }
                }
                return Err(e);
            }
        }
        log::debug!("transaction begun on {} executor(s)", executors.len());

        Ok(Self {
            executors,
            closed: false,
        })
    }

    /// Commit on every executor, in order
    ///
    /// # Errors
    ///
    /// Stops at the first failing commit, rolls back the executors that were
    /// not committed yet and returns that error.
    pub fn commit(mut self) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.closed = true;
        for (index, executor) in self.executors.iter().enumerate() {
            if let Err(e) = executor.commit() {
                for rest in &self.executors[index + 1..] {
                    if let Err(rollback_err) = rest.rollback() {
                        log::warn!("rollback after failed commit also failed: {rollback_err}");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll back on every executor
    ///
    /// # Errors
    ///
    /// Every executor is rolled back even if one fails; the first error is
    /// returned.
    pub fn rollback(mut self) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.rollback_all()
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn rollback_all(&self) -> Result<()> {
        let mut first_error: Option<TideError> = None;
        for executor in &self.executors {
            if let Err(e) = executor.rollback() {
                log::warn!("rollback failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("transaction dropped without commit or rollback; rolling back");
            let _ = self.rollback_all();
        }
    }
}

/// Run `f` inside a transaction over `executors`.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
pub fn transaction<T, F>(executors: &[Arc<dyn Executor>], f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let tx = Transaction::begin(executors.to_vec())?;
    match f() {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            tx.rollback()?;
            Err(e)
        }
    }
}
