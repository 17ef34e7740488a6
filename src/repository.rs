//! Repositories: per-table gateways and entity factories.
//!
//! A [`Repository`] is built once at wiring time from a [`RepositoryDef`]
//! and an executor. It creates and hydrates [`Entity`] values for its table,
//! runs find/insert/update/delete through [`Query`], and applies the table's
//! column whitelist and timestamp policy on the way to the store.
//!
//! Repositories are cheap to clone (they share one `Arc`), and entities keep
//! a weak link back to theirs so that [`Entity::save`] can route through it.

use crate::entity::{Entity, EntitySchema};
use crate::executor::Executor;
use crate::query::Query;
use crate::relation::RelationSpec;
use crate::value::{ConverterRegistry, Row, Value};
use crate::{Result, TideError};
use chrono::format::{Item, StrftimeItems};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Default chrono format of stamped timestamps
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn default_primary_keys() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

/// Real column names of the `created_at`/`updated_at` stamps; `None` disables one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Declarative description of one repository
///
/// Deserializable, so a whole schema can live in configuration:
///
/// ```toml
/// [[schema.repositories]]
/// table = "posts"
/// primary_keys = ["post_id"]
/// auto_increment = true
/// timestamps = { created_at = "created_at", updated_at = "updated_at" }
///
/// [schema.repositories.relations.tags]
/// kind = "join"
/// join = "posts_tags"
/// target = "tags"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDef {
    pub table: String,
    #[serde(default = "default_primary_keys")]
    pub primary_keys: Vec<String>,
    /// Column whitelist; empty means no filtering
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub timestamps: Timestamps,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub relations: IndexMap<String, RelationSpec>,
}

impl RepositoryDef {
    /// Definition keyed by a single `id` column, no whitelist, no timestamps.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_keys: default_primary_keys(),
            columns: Vec::new(),
            timestamps: Timestamps::default(),
            timestamp_format: default_timestamp_format(),
            auto_increment: false,
            relations: IndexMap::new(),
        }
    }

    pub fn primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn timestamps(mut self, created_at: Option<&str>, updated_at: Option<&str>) -> Self {
        self.timestamps = Timestamps {
            created_at: created_at.map(str::to_string),
            updated_at: updated_at.map(str::to_string),
        };
        self
    }

    pub fn timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }

    pub fn relation(mut self, name: impl Into<String>, spec: RelationSpec) -> Self {
        self.relations.insert(name.into(), spec);
        self
    }
}

/// Key argument of [`Repository::find_by_key`]: a scalar for single-column
/// keys, or a column mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    Scalar(Value),
    Keys(Row),
}

impl From<Row> for KeyInput {
    fn from(keys: Row) -> Self {
        KeyInput::Keys(keys)
    }
}

impl From<&Row> for KeyInput {
    fn from(keys: &Row) -> Self {
        KeyInput::Keys(keys.clone())
    }
}

impl From<Value> for KeyInput {
    fn from(value: Value) -> Self {
        KeyInput::Scalar(value)
    }
}

impl From<i32> for KeyInput {
    fn from(value: i32) -> Self {
        KeyInput::Scalar(value.into())
    }
}

impl From<i64> for KeyInput {
    fn from(value: i64) -> Self {
        KeyInput::Scalar(value.into())
    }
}

impl From<&str> for KeyInput {
    fn from(value: &str) -> Self {
        KeyInput::Scalar(value.into())
    }
}

impl From<String> for KeyInput {
    fn from(value: String) -> Self {
        KeyInput::Scalar(value.into())
    }
}

pub(crate) struct RepositoryInner {
    def: RepositoryDef,
    schema: Arc<EntitySchema>,
    executor: Arc<dyn Executor>,
    now: OnceLock<String>,
}

/// Gateway for one table
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.inner.def.table)
            .field("primary_keys", &self.inner.def.primary_keys)
            .finish()
    }
}

impl Repository {
    pub fn new(def: RepositoryDef, executor: Arc<dyn Executor>) -> Self {
        Self::with_converters(def, executor, ConverterRegistry::new())
    }

    /// Repository whose entities read columns through `converters`.
    pub fn with_converters(
        def: RepositoryDef,
        executor: Arc<dyn Executor>,
        converters: ConverterRegistry,
    ) -> Self {
        let schema = Arc::new(EntitySchema {
            table: def.table.clone(),
            primary_keys: def.primary_keys.clone(),
            columns: def.columns.clone(),
            converters,
        });
        Self {
            inner: Arc::new(RepositoryInner {
                def,
                schema,
                executor,
                now: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RepositoryInner>) -> Self {
        Self { inner }
    }

    pub fn table(&self) -> &str {
        &self.inner.def.table
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.inner.def.primary_keys
    }

    pub fn def(&self) -> &RepositoryDef {
        &self.inner.def
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    /// True when both handles share the same repository
    pub fn same_as(&self, other: &Repository) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Declared relation spec by name
    pub fn relation_spec(&self, name: &str) -> Result<&RelationSpec> {
        self.inner
            .def
            .relations
            .get(name)
            .ok_or_else(|| TideError::UnknownRelation {
                table: self.table().to_string(),
                name: name.to_string(),
            })
    }

    /// Fix the request-scoped "now" used for timestamps.
    ///
    /// Returns `false` when it was already set (the first value wins).
    pub fn set_now(&self, now: impl Into<String>) -> bool {
        self.inner.now.set(now.into()).is_ok()
    }

    /// Request-scoped "now", formatted once with the configured format.
    pub fn now(&self) -> Result<&str> {
        if let Some(now) = self.inner.now.get() {
            return Ok(now);
        }
        let format = &self.inner.def.timestamp_format;
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(TideError::Config(format!(
                "invalid timestamp format '{format}' for {}",
                self.table()
            )));
        }
        let formatted = chrono::Local::now().format(format).to_string();
        Ok(self.inner.now.get_or_init(|| formatted))
    }

    /// Fresh, unfetched entity filled with `data`.
    pub fn create(&self, data: Row) -> Entity {
        let mut entity = self.blank();
        entity.fill(data);
        entity
    }

    fn blank(&self) -> Entity {
        Entity::bound(Arc::clone(&self.inner.schema), Arc::downgrade(&self.inner))
    }

    /// Hydrate a store row as a fetched entity of this repository.
    pub fn hydrate(&self, row: Row) -> Result<Entity> {
        Entity::hydrate(self.blank(), row)
    }

    /// Query on this table hydrating rows as this repository's entities.
    pub fn query(&self) -> Query {
        Query::new(Arc::clone(&self.inner.executor), self.table()).with_hydration(self.clone())
    }

    /// Entities matching `keys`; empty `keys` selects every row.
    pub fn find(&self, keys: &Row) -> Result<Vec<Entity>> {
        self.query().find(keys)
    }

    pub fn count(&self, keys: &Row) -> Result<u64> {
        self.query().count(keys)
    }

    /// The single entity matching a primary key.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a scalar key on a composite-key table
    /// - `InvalidArgument` when more than one row matches
    ///
    /// No match is `Ok(None)`.
    pub fn find_by_key(&self, key: impl Into<KeyInput>) -> Result<Option<Entity>> {
        let keys = match key.into() {
            KeyInput::Keys(keys) => keys,
            KeyInput::Scalar(value) => match self.primary_keys() {
                [column] => {
                    let mut keys = Row::new();
                    keys.insert(column.clone(), value);
                    keys
                }
                columns => {
                    return Err(TideError::InvalidArgument(format!(
                        "{} has {} primary key columns; a scalar key cannot address a row",
                        self.table(),
                        columns.len()
                    )))
                }
            },
        };
        let mut found = self.find(&keys)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            n => Err(TideError::InvalidArgument(format!(
                "find_by_key on {} matched {n} rows, expected at most one",
                self.table()
            ))),
        }
    }

    fn filter_columns(&self, data: Row) -> Row {
        data.into_iter()
            .filter(|(column, _)| self.inner.schema.allows(column))
            .collect()
    }

    /// Stamp `column` in both payload and entity unless the entity already
    /// carries a value for it.
    /// Stamp `column` with "now" in `payload` unless it already holds a value.
    /// Returns the stamp so the caller can copy it onto the entity once the
    /// write went through.
    fn stamp(&self, column: Option<&String>, payload: &mut Row) -> Result<Option<(String, Value)>> {
        let Some(column) = column else {
            return Ok(None);
        };
        if payload.get(column).is_some_and(|v| !v.is_null()) {
            return Ok(None);
        }
        let now = Value::from(self.now()?);
        payload.insert(column.clone(), now.clone());
        Ok(Some((column.clone(), now)))
    }

    /// Insert an unfetched entity.
    ///
    /// # Returns
    ///
    /// `Ok(true)` once inserted (with the generated id assigned when the
    /// table is auto-increment), `Ok(false)` when the store inserted nothing.
    pub fn insert(&self, entity: &mut Entity) -> Result<bool> {
        let def = &self.inner.def;
        let mut payload = self.filter_columns(entity.to_map());
        let stamps = [
            self.stamp(def.timestamps.created_at.as_ref(), &mut payload)?,
            self.stamp(def.timestamps.updated_at.as_ref(), &mut payload)?,
        ];

        let auto_column = match (def.auto_increment, def.primary_keys.as_slice()) {
            (true, [column]) if payload.get(column).map_or(true, Value::is_null) => {
                payload.shift_remove(column);
                Some(column.clone())
            }
            _ => None,
        };

        if !self.query().insert(&payload)? {
            log::warn!("insert into {} reported no row", self.table());
            return Ok(false);
        }

        for (column, now) in stamps.into_iter().flatten() {
            entity.set(column, now);
        }
        match auto_column {
            Some(column) if !entity.is_fetched() => {
                let id = self.query().last_id(&column)?;
                entity.set_primary_key_on_created(id)?;
            }
            _ => entity.mark_persisted(),
        }
        Ok(true)
    }

    /// Update a fetched entity with its changed columns.
    ///
    /// Key columns go into the WHERE clause only. `updated_at` is stamped
    /// unless the change set already carries it. An entity with no changes
    /// is left alone and `Ok(false)` is returned.
    pub fn update(&self, entity: &mut Entity) -> Result<bool> {
        let keys = entity.keys()?;
        let mut payload = self.filter_columns(entity.updated_data());
        for column in self.primary_keys() {
            payload.shift_remove(column);
        }
        if payload.is_empty() {
            log::debug!("update on {} skipped: nothing changed", self.table());
            return Ok(false);
        }
        let stamp = self.stamp(self.inner.def.timestamps.updated_at.as_ref(), &mut payload)?;

        let affected = self.query().update(&keys, &payload)?;
        if let Some((column, now)) = stamp {
            entity.set(column, now);
        }
        entity.mark_persisted();
        Ok(affected > 0)
    }

    /// Delete the row addressed by the entity's keys.
    pub fn delete(&self, entity: &Entity) -> Result<bool> {
        let keys = entity.keys()?;
        Ok(self.query().delete(&keys)? > 0)
    }

    /// Insert or update depending on [`Entity::is_fetched`].
    pub fn save(&self, entity: &mut Entity) -> Result<bool> {
        if entity.is_fetched() {
            self.update(entity)
        } else {
            self.insert(entity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MemoryExecutor, Statement};
    use crate::row;
    use pretty_assertions::assert_eq;

    fn members() -> (Arc<MemoryExecutor>, Repository) {
        let db = Arc::new(MemoryExecutor::new());
        db.seed(
            "members",
            vec![
                row! { "type" => 1, "code" => 100, "name" => "Main Member" },
                row! { "type" => 1, "code" => 101, "name" => "Sub Member" },
                row! { "type" => 2, "code" => 100, "name" => "Guest" },
            ],
        );
        let repo = Repository::new(
            RepositoryDef::new("members").primary_keys(&["type", "code"]),
            db.clone(),
        );
        (db, repo)
    }

    #[test]
    fn test_find_by_composite_key() {
        let (_db, repo) = members();
        let member = repo
            .find_by_key(row! { "type" => 1, "code" => 100 })
            .unwrap()
            .unwrap();
        assert_eq!(member.get("name"), Value::from("Main Member"));
        assert!(member.is_fetched());
        assert_eq!(member.keys().unwrap(), row! { "type" => 1, "code" => 100 });
    }

    #[test]
    fn test_find_by_key_rejects_ambiguous_matches() {
        let (_db, repo) = members();
        let err = repo.find_by_key(row! { "type" => 1 }).unwrap_err();
        assert!(matches!(err, TideError::InvalidArgument(ref m) if m.contains("2 rows")));
        assert!(repo.find_by_key(row! { "type" => 9, "code" => 9 }).unwrap().is_none());
    }

    #[test]
    fn test_scalar_key_needs_single_column() {
        let (_db, repo) = members();
        assert!(matches!(
            repo.find_by_key(1),
            Err(TideError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_update_strips_keys_from_set_clause() {
        let db = Arc::new(MemoryExecutor::new());
        db.seed("items", vec![row! { "p1" => "v1", "p2" => "v2", "col1" => "old" }]);
        let repo = Repository::new(
            RepositoryDef::new("items")
                .primary_keys(&["p1", "p2"])
                .columns(&["p1", "p2", "col1", "col2"])
                .timestamps(None, Some("updated_at")),
            db.clone(),
        );
        repo.set_now("2024-05-01 10:00:00");
        let mut entity =
            repo.create(row! { "p1" => "v1", "p2" => "v2", "col1" => "val", "col2" => "test" });
        repo.update(&mut entity).unwrap();

        match db.statements().last() {
            Some(Statement::Update { data, condition, .. }) => {
                assert_eq!(
                    data,
                    &row! { "col1" => "val", "col2" => "test", "updated_at" => "2024-05-01 10:00:00" }
                );
                assert_eq!(condition, &crate::Condition::keys(&row! { "p1" => "v1", "p2" => "v2" }));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_stamps_and_assigns_id() {
        let db = Arc::new(MemoryExecutor::new());
        db.create_table("posts", Some("id"));
        let repo = Repository::new(
            RepositoryDef::new("posts")
                .auto_increment(true)
                .timestamps(Some("created_at"), Some("updated_at")),
            db.clone(),
        );
        repo.set_now("2024-05-01 10:00:00");
        let mut post = repo.create(row! { "title" => "Hello", "created_at" => "2020-01-01 00:00:00" });
        assert!(repo.insert(&mut post).unwrap());
        assert!(post.is_fetched());
        assert_eq!(post.get("id"), Value::Int(1));
        assert_eq!(post.get("created_at"), Value::from("2020-01-01 00:00:00"));
        assert_eq!(post.get("updated_at"), Value::from("2024-05-01 10:00:00"));

        let found = repo.find_by_key(1).unwrap().unwrap();
        assert_eq!(found.to_map(), post.to_map());
    }

    /// Store that accepts every statement but never reports an inserted row
    struct InsertsNothing(MemoryExecutor);

    impl Executor for InsertsNothing {
        fn select(&self, spec: &crate::QuerySpec) -> Result<Vec<Row>> {
            self.0.select(spec)
        }
        fn count(&self, spec: &crate::QuerySpec) -> Result<u64> {
            self.0.count(spec)
        }
        fn insert(&self, _table: &str, _data: &Row) -> Result<bool> {
            Ok(false)
        }
        fn update(&self, spec: &crate::QuerySpec, data: &Row) -> Result<u64> {
            self.0.update(spec, data)
        }
        fn delete(&self, spec: &crate::QuerySpec) -> Result<u64> {
            self.0.delete(spec)
        }
        fn last_id(&self, table: &str, column: &str) -> Result<Value> {
            self.0.last_id(table, column)
        }
        fn begin(&self, isolation: crate::IsolationLevel) -> Result<()> {
            self.0.begin(isolation)
        }
        fn commit(&self) -> Result<()> {
            self.0.commit()
        }
        fn rollback(&self) -> Result<()> {
            self.0.rollback()
        }
    }

    #[test]
    fn test_insert_that_stores_nothing_leaves_entity_unstamped() {
        let repo = Repository::new(
            RepositoryDef::new("posts").timestamps(Some("created_at"), Some("updated_at")),
            Arc::new(InsertsNothing(MemoryExecutor::new())),
        );
        repo.set_now("2024-05-01 10:00:00");
        let mut post = repo.create(row! { "id" => 1, "title" => "Hello" });
        assert!(!repo.insert(&mut post).unwrap());
        assert!(!post.is_fetched());
        assert_eq!(post.to_map(), row! { "id" => 1, "title" => "Hello" });
    }

    #[test]
    fn test_save_routes_by_fetched_state() {
        let db = Arc::new(MemoryExecutor::new());
        db.create_table("users", Some("id"));
        let repo = Repository::new(RepositoryDef::new("users").auto_increment(true), db.clone());
        let mut user = repo.create(row! { "name" => "Alice" });
        user.save().unwrap();
        user.set("name", "Alicia");
        assert!(user.save().unwrap());
        assert!(!user.save().unwrap());
        let kinds: Vec<_> = db
            .statements()
            .into_iter()
            .filter(|s| matches!(s, Statement::Insert { .. } | Statement::Update { .. }))
            .collect();
        assert_eq!(kinds.len(), 2);
        assert_eq!(db.rows("users")[0].get("name"), Some(&Value::from("Alicia")));
    }

    #[test]
    fn test_delete_by_keys() {
        let (db, repo) = members();
        let member = repo.find_by_key(row! { "type" => 2, "code" => 100 }).unwrap().unwrap();
        assert!(repo.delete(&member).unwrap());
        assert_eq!(db.rows("members").len(), 2);
    }

    #[test]
    fn test_now_is_set_once() {
        let (_db, repo) = members();
        assert!(repo.set_now("2024-01-01 00:00:00"));
        assert!(!repo.set_now("2025-01-01 00:00:00"));
        assert_eq!(repo.now().unwrap(), "2024-01-01 00:00:00");
    }

    #[test]
    fn test_invalid_timestamp_format() {
        let db = Arc::new(MemoryExecutor::new());
        let repo = Repository::new(RepositoryDef::new("t").timestamp_format("%Q%"), db);
        assert!(matches!(repo.now(), Err(TideError::Config(_))));
    }

    #[test]
    fn test_unknown_relation() {
        let (_db, repo) = members();
        assert!(matches!(
            repo.relation_spec("posts"),
            Err(TideError::UnknownRelation { .. })
        ));
    }
}
