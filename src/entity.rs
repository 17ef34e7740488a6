//! Entities: mutable records with primary-key awareness and dirty tracking.
//!
//! An [`Entity`] is created unfetched by [`Repository::create`] or hydrated
//! from a row by a query. It keeps two snapshots of its columns: `data`
//! (what callers see and mutate) and `original` (the last persisted values),
//! and the difference between the two is the payload of an `UPDATE`.
//!
//! Entities carry the schema of their table ([`EntitySchema`]) behind an
//! `Arc`, so cloning one is cheap and every entity of a repository shares
//! the same key list, column whitelist and converters.
//!
//! [`Repository::create`]: crate::Repository::create

use crate::repository::{Repository, RepositoryInner};
use crate::value::{Converter, ConverterRegistry, Row, Value};
use crate::{Result, TideError};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Column mapping used to rename key columns (from-column to to-column).
pub type ColumnMap = IndexMap<String, String>;

/// Table layout shared by every entity of one repository
#[derive(Debug, Default)]
pub struct EntitySchema {
    pub table: String,
    /// Primary key columns in declared order
    pub primary_keys: Vec<String>,
    /// Column whitelist; empty means no filtering
    pub columns: Vec<String>,
    pub converters: ConverterRegistry,
}

impl EntitySchema {
    pub fn new(table: impl Into<String>, primary_keys: Vec<String>) -> Self {
        Self {
            table: table.into(),
            primary_keys,
            ..Self::default()
        }
    }

    /// True when `column` passes the whitelist.
    pub fn allows(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == column)
    }
}

/// A record of one table row (or of a row not persisted yet)
#[derive(Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    data: Row,
    original: Row,
    fetched: bool,
    sealed: bool,
    related: IndexMap<String, Vec<Entity>>,
    repository: Weak<RepositoryInner>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("table", &self.schema.table)
            .field("data", &self.data)
            .field("fetched", &self.fetched)
            .field("related", &self.related)
            .finish()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.schema.table == other.schema.table && self.data == other.data
    }
}

impl Entity {
    /// Empty, unfetched entity of `schema`.
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            data: Row::new(),
            original: Row::new(),
            fetched: false,
            sealed: false,
            related: IndexMap::new(),
            repository: Weak::new(),
        }
    }

    /// Entity not bound to any repository; `save` on it fails.
    pub fn detached(table: &str, primary_keys: &[&str]) -> Self {
        Self::new(Arc::new(EntitySchema::new(
            table,
            primary_keys.iter().map(|k| k.to_string()).collect(),
        )))
    }

    pub(crate) fn bound(schema: Arc<EntitySchema>, repository: Weak<RepositoryInner>) -> Self {
        Self {
            repository,
            ..Self::new(schema)
        }
    }

    /// Fetched, sealed entity holding `row`, detached from any repository.
    pub fn hydrated(table: &str, primary_keys: Vec<String>, row: Row) -> Result<Self> {
        Self::hydrate(
            Self::new(Arc::new(EntitySchema::new(table, primary_keys))),
            row,
        )
    }

    /// Populate `entity` from a store row through the hydration gate.
    pub(crate) fn hydrate(mut entity: Entity, row: Row) -> Result<Self> {
        for (column, value) in row {
            entity.set_raw(column, value)?;
        }
        entity.finish_hydration();
        Ok(entity)
    }

    /// Seal the entity after hydration: it becomes fetched, its current data
    /// becomes the persisted snapshot and raw writes are refused from now on.
    pub fn finish_hydration(&mut self) {
        self.sealed = true;
        self.mark_persisted();
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.schema.primary_keys
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Stored value of `key`, passed through its converter if one is registered.
    ///
    /// Absent columns read as [`Value::Null`]; converters receive `Null` for
    /// them too.
    pub fn get(&self, key: &str) -> Value {
        let raw = self.data.get(key).cloned().unwrap_or_default();
        match self.schema.converters.get(key) {
            Some(converter) => converter.apply_value(&raw).unwrap_or(raw),
            None => raw,
        }
    }

    /// Read `key` as a value object of type `T`.
    ///
    /// A `Construct` converter registered for `T` is used directly; otherwise
    /// `T` is built from [`Entity::get`] through its `From<Value>`.
    pub fn get_as<T>(&self, key: &str) -> T
    where
        T: From<Value> + 'static,
    {
        if let Some(Converter::Construct { build, .. }) = self.schema.converters.get(key) {
            let raw = self.data.get(key).cloned().unwrap_or_default();
            if let Ok(object) = build(&raw).downcast::<T>() {
                return *object;
            }
        }
        T::from(self.get(key))
    }

    /// Stored value without conversion
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set a column.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Raw property write, allowed only until hydration is finished.
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if self.sealed {
            return Err(TideError::IllegalState(format!(
                "cannot set raw property '{key}' on {} entity after hydration",
                self.schema.table
            )));
        }
        self.data.insert(key, value);
        Ok(())
    }

    /// Merge `data`, dropping columns outside the whitelist.
    ///
    /// Filling never changes the fetched flag.
    pub fn fill(&mut self, data: Row) -> &mut Self {
        for (column, value) in data {
            if self.schema.allows(&column) {
                self.data.insert(column, value);
            }
        }
        self
    }

    /// [`Entity::fill`] from a JSON object.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `json` is not an object.
    pub fn fill_json(&mut self, json: serde_json::Value) -> Result<&mut Self> {
        match json {
            serde_json::Value::Object(map) => {
                let data = map
                    .into_iter()
                    .map(|(column, value)| (column, Value::from_json(value)))
                    .collect();
                Ok(self.fill(data))
            }
            other => Err(TideError::InvalidArgument(format!(
                "cannot fill {} entity from non-object JSON {other}",
                self.schema.table
            ))),
        }
    }

    /// Projection onto the primary key columns, in declared order.
    ///
    /// # Errors
    ///
    /// `MissingKey` when a key column is absent. A partial composite key is
    /// never returned.
    pub fn keys(&self) -> Result<Row> {
        self.schema
            .primary_keys
            .iter()
            .map(|column| {
                self.data
                    .get(column)
                    .map(|value| (column.clone(), value.clone()))
                    .ok_or_else(|| TideError::missing_key(&self.schema.table, column))
            })
            .collect()
    }

    /// Assign the auto-increment id generated by an insert.
    ///
    /// # Errors
    ///
    /// - `IllegalState` on an entity that is already fetched
    /// - `InvalidArgument` when the table does not have exactly one key column
    pub fn set_primary_key_on_created(&mut self, id: impl Into<Value>) -> Result<()> {
        if self.fetched {
            return Err(TideError::IllegalState(format!(
                "primary key of fetched {} entity cannot be reassigned",
                self.schema.table
            )));
        }
        let column = match self.schema.primary_keys.as_slice() {
            [column] => column.clone(),
            keys => {
                return Err(TideError::InvalidArgument(format!(
                    "{} has {} primary key columns, expected exactly one",
                    self.schema.table,
                    keys.len()
                )))
            }
        };
        self.data.insert(column, id.into());
        self.mark_persisted();
        Ok(())
    }

    /// Copy the key columns of `target` into this entity, renamed by `convert`.
    ///
    /// `convert` maps a column of `target` to a column of `self`. With an
    /// empty map the primary keys of `target` are copied under their own
    /// names.
    pub fn relate(&mut self, target: &Entity, convert: &ColumnMap) -> Result<&mut Self> {
        if convert.is_empty() {
            let keys = target.keys()?;
            self.data.extend(keys);
            return Ok(self);
        }
        for (from, to) in convert {
            let value = target
                .data
                .get(from)
                .cloned()
                .ok_or_else(|| TideError::missing_key(&target.schema.table, from))?;
            self.data.insert(to.clone(), value);
        }
        Ok(self)
    }

    /// Full snapshot of the current data
    pub fn to_map(&self) -> Row {
        self.data.clone()
    }

    pub fn data(&self) -> &Row {
        &self.data
    }

    /// Columns whose value differs from the last persisted snapshot.
    pub fn updated_data(&self) -> Row {
        self.data
            .iter()
            .filter(|(column, value)| self.original.get(*column) != Some(*value))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub fn is_dirty(&self) -> bool {
        !self.fetched || !self.updated_data().is_empty()
    }

    /// Mark the current data as persisted.
    pub(crate) fn mark_persisted(&mut self) {
        self.fetched = true;
        self.original = self.data.clone();
    }

    /// Persist through the owning repository (insert or update by fetched state).
    ///
    /// # Errors
    ///
    /// `IllegalState` when the entity was not created by a repository, or
    /// the repository is gone.
    pub fn save(&mut self) -> Result<bool> {
        let inner = self.repository.upgrade().ok_or_else(|| {
            TideError::IllegalState(format!(
                "{} entity is not bound to a repository",
                self.schema.table
            ))
        })?;
        Repository::from_inner(inner).save(self)
    }

    /// Entities attached under a relation name; empty when none were loaded.
    pub fn related(&self, name: &str) -> &[Entity] {
        self.related.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn related_mut(&mut self, name: &str) -> Option<&mut Vec<Entity>> {
        self.related.get_mut(name)
    }

    pub fn set_related(&mut self, name: impl Into<String>, entities: Vec<Entity>) {
        self.related.insert(name.into(), entities);
    }

    pub fn take_related(&mut self, name: &str) -> Vec<Entity> {
        self.related.shift_remove(name).unwrap_or_default()
    }

    pub fn has_related(&self, name: &str) -> bool {
        self.related.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use pretty_assertions::assert_eq;

    fn schema() -> Arc<EntitySchema> {
        Arc::new(EntitySchema {
            table: "users".into(),
            primary_keys: vec!["id".into()],
            columns: vec!["id".into(), "name".into(), "status".into()],
            converters: ConverterRegistry::new(),
        })
    }

    #[test]
    fn test_fill_is_idempotent_and_filtered() {
        let mut entity = Entity::new(schema());
        let data = row! { "name" => "Alice", "status" => 1, "password" => "x" };
        entity.fill(data.clone());
        let once = entity.to_map();
        entity.fill(data);
        assert_eq!(entity.to_map(), once);
        assert!(!entity.has("password"));
        assert!(!entity.is_fetched());
    }

    #[test]
    fn test_fill_json_rejects_non_objects() {
        let mut entity = Entity::new(schema());
        entity.fill_json(serde_json::json!({ "name": "Bob" })).unwrap();
        assert_eq!(entity.get("name"), Value::from("Bob"));
        let err = entity.fill_json(serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, TideError::InvalidArgument(_)));
    }

    #[test]
    fn test_keys_in_declared_order() {
        let mut entity = Entity::detached("members", &["type", "code"]);
        entity.fill(row! { "code" => 100, "name" => "Main Member", "type" => 1 });
        let keys = entity.keys().unwrap();
        assert_eq!(keys.keys().collect::<Vec<_>>(), vec!["type", "code"]);
        assert_eq!(keys["type"], Value::Int(1));
    }

    #[test]
    fn test_keys_fail_on_missing_column() {
        let mut entity = Entity::detached("members", &["type", "code"]);
        entity.fill(row! { "type" => 1 });
        match entity.keys() {
            Err(TideError::MissingKey { table, column }) => {
                assert_eq!(table, "members");
                assert_eq!(column, "code");
            }
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn test_hydration_gate() {
        let entity = Entity::hydrated("users", vec!["id".into()], row! { "id" => 1 }).unwrap();
        assert!(entity.is_fetched());
        let mut entity = entity;
        let err = entity.set_raw("name", Value::from("late")).unwrap_err();
        assert!(matches!(err, TideError::IllegalState(_)));
        entity.set("name", "normal");
        assert_eq!(entity.get("name"), Value::from("normal"));
    }

    #[test]
    fn test_set_primary_key_on_created() {
        let mut entity = Entity::new(schema());
        entity.fill(row! { "name" => "Alice" });
        entity.set_primary_key_on_created(10).unwrap();
        assert!(entity.is_fetched());
        assert_eq!(entity.keys().unwrap(), row! { "id" => 10 });
        assert!(entity.updated_data().is_empty());
        let err = entity.set_primary_key_on_created(11).unwrap_err();
        assert!(matches!(err, TideError::IllegalState(_)));
        assert_eq!(entity.get("id"), Value::Int(10));
    }

    #[test]
    fn test_updated_data_is_a_diff() {
        let mut entity =
            Entity::hydrated("users", vec!["id".into()], row! { "id" => 1, "name" => "A" })
                .unwrap();
        assert!(!entity.is_dirty());
        entity.set("name", "B").set("status", 2);
        assert_eq!(entity.updated_data(), row! { "name" => "B", "status" => 2 });
        assert!(entity.is_dirty());
    }

    #[test]
    fn test_relate_renames_keys() {
        let user = Entity::hydrated("users", vec!["id".into()], row! { "id" => 7 }).unwrap();
        let mut post = Entity::detached("posts", &["post_id"]);
        let convert: ColumnMap = [("id".to_string(), "user_id".to_string())].into_iter().collect();
        post.relate(&user, &convert).unwrap();
        assert_eq!(post.get("user_id"), Value::Int(7));

        let mut copy = Entity::detached("audit", &["id"]);
        copy.relate(&user, &ColumnMap::new()).unwrap();
        assert_eq!(copy.get("id"), Value::Int(7));
    }

    #[test]
    fn test_converters_apply_on_read() {
        #[derive(Debug, PartialEq)]
        struct Status(i64);
        impl From<Value> for Status {
            fn from(v: Value) -> Self {
                Status(v.as_i64().unwrap_or(-1))
            }
        }

        let mut converters = ConverterRegistry::new();
        converters.register("status", Converter::construct::<Status>());
        converters.register(
            "name",
            Converter::apply(|raw| match raw {
                Value::Null => Value::from("anonymous"),
                other => other.clone(),
            }),
        );
        let schema = Arc::new(EntitySchema {
            converters,
            ..EntitySchema::new("users", vec!["id".into()])
        });
        let mut entity = Entity::new(schema);
        assert_eq!(entity.get("name"), Value::from("anonymous"));
        assert_eq!(entity.get_as::<Status>("status"), Status(-1));
        entity.set("status", 3);
        assert_eq!(entity.get_as::<Status>("status"), Status(3));
        assert_eq!(entity.get("missing"), Value::Null);
    }

    #[test]
    fn test_unbound_save_is_illegal() {
        let mut entity = Entity::detached("users", &["id"]);
        assert!(matches!(entity.save(), Err(TideError::IllegalState(_))));
    }

    #[test]
    fn test_related_defaults_to_empty() {
        let mut entity = Entity::detached("users", &["id"]);
        assert!(entity.related("posts").is_empty());
        assert!(!entity.has_related("posts"));
        entity.set_related("posts", vec![Entity::detached("posts", &["id"])]);
        assert_eq!(entity.related("posts").len(), 1);
        assert_eq!(entity.take_related("posts").len(), 1);
        assert!(!entity.has_related("posts"));
    }
}
