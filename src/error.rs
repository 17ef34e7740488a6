//! Error type shared by every layer of the crate.
//!
//! Errors are raised synchronously at the call site and propagated with `?`;
//! nothing in the core retries or swallows them. "No rows" is never an error:
//! finders return empty vectors or `None` instead.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T, E = TideError> = std::result::Result<T, E>;

/// Error type for entity, repository, relation and executor operations
#[derive(Debug)]
pub enum TideError {
    /// A caller passed an argument the operation cannot work with
    /// (e.g. a scalar key for a composite primary key, or a list with no
    /// bound relation).
    InvalidArgument(String),
    /// The operation is not allowed in the current state of the object
    /// (e.g. raw writes on a sealed entity, clearing an unbound join relation).
    IllegalState(String),
    /// A key column required to build or correlate a key is absent.
    MissingKey { table: String, column: String },
    /// An aggregate met a value that is not numeric.
    NumericType { column: String, value: String },
    /// No relation with that name is declared on the repository.
    UnknownRelation { table: String, name: String },
    /// No repository is registered for that table.
    UnknownRepository(String),
    /// The backing store rejected or failed a statement.
    Executor(String),
    /// Configuration could not be loaded or is inconsistent.
    Config(String),
    /// `PostgreSQL` error from `may_postgres`
    #[cfg(feature = "postgres")]
    Postgres(may_postgres::Error),
}

impl TideError {
    pub(crate) fn missing_key(table: &str, column: &str) -> Self {
        TideError::MissingKey {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl fmt::Display for TideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TideError::InvalidArgument(s) => write!(f, "Invalid argument: {s}"),
            TideError::IllegalState(s) => write!(f, "Illegal state: {s}"),
            TideError::MissingKey { table, column } => {
                write!(f, "Missing key column '{column}' on entity of table '{table}'")
            }
            TideError::NumericType { column, value } => {
                write!(f, "Non-numeric value {value} in column '{column}'")
            }
            TideError::UnknownRelation { table, name } => {
                write!(f, "Repository '{table}' has no relation named '{name}'")
            }
            TideError::UnknownRepository(table) => {
                write!(f, "No repository registered for table '{table}'")
            }
            TideError::Executor(s) => write!(f, "Execution error: {s}"),
            TideError::Config(s) => write!(f, "Configuration error: {s}"),
            #[cfg(feature = "postgres")]
            TideError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
        }
    }
}

impl std::error::Error for TideError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "postgres")]
            TideError::Postgres(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<may_postgres::Error> for TideError {
    fn from(err: may_postgres::Error) -> Self {
        TideError::Postgres(err)
    }
}

impl From<config::ConfigError> for TideError {
    fn from(err: config::ConfigError) -> Self {
        TideError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TideError {
    fn from(err: serde_json::Error) -> Self {
        TideError::InvalidArgument(format!("invalid JSON input: {err}"))
    }
}
