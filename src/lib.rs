//! # Tideline
//!
//! Entity/repository ORM with batched relation loading, for blocking
//! coroutine-friendly PostgreSQL on the `may` runtime.
//!
//! - [`Entity`]: one table row with dirty tracking
//! - [`Repository`]: finders and writes for one table
//! - [`Relation`] / [`JoinRelation`]: has-one, has-many, belongs-to and
//!   many-to-many descriptors
//! - [`Related`] / [`Joined`]: batched collectors that resolve a relation for
//!   a whole result set with one query per hop
//! - [`EntityList`]: a result set with cached relation loading and aggregates
//!
//! Everything runs against an [`Executor`]: the in-process
//! [`MemoryExecutor`] or, with the `postgres` feature, `PostgresExecutor`.
//!
//! ```
//! use std::sync::Arc;
//! use tideline::{row, MemoryExecutor, RegistryBuilder, RelationSpec, RepositoryDef};
//!
//! let db = Arc::new(MemoryExecutor::new());
//! db.seed("users", vec![row! { "id" => 1, "name" => "Alice" }, row! { "id" => 2, "name" => "Bob" }]);
//! db.seed("posts", vec![
//!     row! { "post_id" => 1, "user_id" => 1 },
//!     row! { "post_id" => 2, "user_id" => 2 },
//! ]);
//!
//! let registry = RegistryBuilder::new(db.clone())
//!     .repository(RepositoryDef::new("users").relation(
//!         "posts",
//!         RelationSpec::has_many("posts").with_convert(&[("id", "user_id")]),
//!     ))
//!     .repository(RepositoryDef::new("posts").primary_keys(&["post_id"]))
//!     .build()?;
//!
//! let mut users = registry.find("users", &row! {})?;
//! db.clear_history();
//! users.load("posts")?;
//! assert_eq!(db.query_count(), 1);
//! assert_eq!(users[1].related("posts").len(), 1);
//! # Ok::<(), tideline::TideError>(())
//! ```

pub mod collection;
pub mod config;
#[cfg(feature = "postgres")]
pub mod connection;
pub mod entity;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod relation;
pub mod repository;
pub mod transaction;
pub mod value;

pub use collection::EntityList;
pub use config::{DatabaseConfig, SchemaConfig, TidelineConfig};
pub use entity::{ColumnMap, Entity, EntitySchema};
pub use error::{Result, TideError};
pub use executor::{Executor, MemoryExecutor, Statement};
#[cfg(feature = "postgres")]
pub use executor::PostgresExecutor;
pub use query::{Condition, JoinClause, Order, Query, QuerySpec};
pub use registry::{Registry, RegistryBuilder};
pub use relation::{
    AnyRelation, Collected, JoinRelation, JoinSpec, Joined, Related, Relation, RelationKind,
    RelationSpec, RelationTrait, SimpleSpec,
};
pub use repository::{KeyInput, Repository, RepositoryDef, Timestamps};
pub use transaction::{IsolationLevel, Transaction};
pub use value::{Converter, ConverterRegistry, Row, Value};
