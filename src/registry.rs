//! Repository registry
//!
//! The [`Registry`] is built once at startup and passed to whatever needs a
//! repository or a relation. It owns the executor and one [`Repository`] per
//! table, and resolves relation names declared on a repository into live
//! relation descriptors. Cloning a registry is cheap; clones share the same
//! repositories.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tideline::{row, MemoryExecutor, RegistryBuilder, RelationSpec, RepositoryDef};
//!
//! let db = Arc::new(MemoryExecutor::new());
//! db.seed("users", vec![row! { "id" => 1 }]);
//! db.seed("posts", vec![row! { "post_id" => 1, "user_id" => 1 }]);
//!
//! let registry = RegistryBuilder::new(db)
//!     .repository(
//!         RepositoryDef::new("users")
//!             .relation("posts", RelationSpec::has_many("posts").with_convert(&[("id", "user_id")])),
//!     )
//!     .repository(RepositoryDef::new("posts").primary_keys(&["post_id"]))
//!     .build()?;
//!
//! let mut users = registry.find("users", &row! {})?;
//! users.load("posts")?;
//! assert_eq!(users[0].related("posts").len(), 1);
//! # Ok::<(), tideline::TideError>(())
//! ```

use crate::collection::EntityList;
use crate::config::SchemaConfig;
use crate::entity::Entity;
use crate::executor::Executor;
use crate::relation::{AnyRelation, RelationSpec, RelationTrait};
use crate::repository::{Repository, RepositoryDef};
use crate::transaction;
use crate::value::{Converter, ConverterRegistry, Row};
use crate::{Result, TideError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct RegistryInner {
    executor: Arc<dyn Executor>,
    repositories: IndexMap<String, Repository>,
}

/// Executor plus every repository of the application
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("repositories", &self.inner.repositories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder collecting repository definitions and converters
pub struct RegistryBuilder {
    executor: Arc<dyn Executor>,
    defs: Vec<RepositoryDef>,
    converters: HashMap<String, ConverterRegistry>,
}

impl RegistryBuilder {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            defs: Vec::new(),
            converters: HashMap::new(),
        }
    }

    pub fn repository(mut self, def: RepositoryDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Register a read converter for `table.column`.
    pub fn converter(mut self, table: &str, column: &str, converter: Converter) -> Self {
        self.converters
            .entry(table.to_string())
            .or_default()
            .register(column, converter);
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// `Config` when a table is defined twice, when a converter names an
    /// undefined table, or when a relation points at an undefined table.
    pub fn build(mut self) -> Result<Registry> {
        let mut repositories = IndexMap::with_capacity(self.defs.len());
        for def in self.defs {
            if repositories.contains_key(&def.table) {
                return Err(TideError::Config(format!(
                    "repository '{}' is defined more than once",
                    def.table
                )));
            }
            let converters = self.converters.remove(&def.table).unwrap_or_default();
            let table = def.table.clone();
            let repository = Repository::with_converters(def, Arc::clone(&self.executor), converters);
            repositories.insert(table, repository);
        }
        if let Some(table) = self.converters.keys().next() {
            return Err(TideError::Config(format!(
                "converters registered for undefined repository '{table}'"
            )));
        }

        for repository in repositories.values() {
            for (name, spec) in &repository.def().relations {
                let mut tables = vec![spec.target()];
                if let RelationSpec::Join(join) = spec {
                    tables.push(join.join.as_str());
                }
                if let Some(missing) = tables.into_iter().find(|t| !repositories.contains_key(*t)) {
                    return Err(TideError::Config(format!(
                        "relation '{name}' of '{}' refers to undefined repository '{missing}'",
                        repository.table()
                    )));
                }
            }
        }
        log::debug!("registry built with {} repositories", repositories.len());

        Ok(Registry {
            inner: Arc::new(RegistryInner {
                executor: self.executor,
                repositories,
            }),
        })
    }
}

impl Registry {
    /// Registry with every repository of `schema`.
    pub fn from_schema(executor: Arc<dyn Executor>, schema: &SchemaConfig) -> Result<Self> {
        schema
            .repositories
            .iter()
            .cloned()
            .fold(RegistryBuilder::new(executor), RegistryBuilder::repository)
            .build()
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    /// Repository of `table`
    ///
    /// # Errors
    ///
    /// `UnknownRepository` when the table is not registered.
    pub fn repository(&self, table: &str) -> Result<&Repository> {
        self.inner
            .repositories
            .get(table)
            .ok_or_else(|| TideError::UnknownRepository(table.to_string()))
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.inner.repositories.values()
    }

    /// Relation `name` declared on the repository of `table`, unbound.
    pub fn relation(&self, table: &str, name: &str) -> Result<AnyRelation> {
        let repository = self.repository(table)?;
        repository.relation_spec(name)?.build(repository, self)
    }

    /// Container over `entities` of `table`.
    pub fn list(&self, table: &str, entities: Vec<Entity>) -> Result<EntityList> {
        Ok(EntityList::new(
            self.clone(),
            self.repository(table)?.clone(),
            entities,
        ))
    }

    /// Entities of `table` matching `keys`, in a container.
    pub fn find(&self, table: &str, keys: &Row) -> Result<EntityList> {
        let entities = self.repository(table)?.find(keys)?;
        self.list(table, entities)
    }

    /// Related entities of `entity` through its relation `name`, in a
    /// container bound to that relation (so `add`/`delete` persist).
    pub fn related_list(&self, name: &str, entity: &Entity) -> Result<EntityList> {
        let relation = self.relation(entity.table(), name)?.with_entity(entity);
        let entities = relation.find(&Row::new())?;
        Ok(EntityList::for_relation(self.clone(), relation, entities))
    }

    /// Run `f` in a transaction on the registry's executor.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Registry) -> Result<T>,
    {
        transaction::transaction(&[Arc::clone(&self.inner.executor)], || f(self))
    }
}
