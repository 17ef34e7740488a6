//! Entity containers with batched relation loading.
//!
//! An [`EntityList`] holds the entities of one repository. Asking it to
//! [`load`](EntityList::load) a relation resolves that relation for every
//! held entity with one batched query per hop and attaches the results onto
//! each entity under the relation name, where [`Entity::related`] reads them.
//!
//! Collectors are cached per relation name for the lifetime of the list, so
//! loading the same relation twice never queries twice.
//!
//! A list obtained through [`EntityList::relate`] or
//! [`Registry::related_list`] is bound to the relation it came from; `add`
//! and `delete` on such a list persist the membership change.

use crate::entity::Entity;
use crate::registry::Registry;
use crate::relation::{AnyRelation, Collected, RelationKind, RelationTrait};
use crate::repository::Repository;
use crate::value::Value;
use crate::{Result, TideError};
use std::collections::HashMap;
use std::ops::Index;

/// Entities of one repository, plus cached relation collectors
#[derive(Debug, Clone)]
pub struct EntityList {
    registry: Registry,
    repository: Repository,
    entities: Vec<Entity>,
    collected: HashMap<String, Collected>,
    relation: Option<AnyRelation>,
}

impl EntityList {
    pub fn new(registry: Registry, repository: Repository, entities: Vec<Entity>) -> Self {
        Self {
            registry,
            repository,
            entities,
            collected: HashMap::new(),
            relation: None,
        }
    }

    /// List of the targets of `relation`, bound to it for `add`/`delete`.
    pub fn for_relation(registry: Registry, relation: AnyRelation, entities: Vec<Entity>) -> Self {
        Self {
            registry,
            repository: relation.target().clone(),
            entities,
            collected: HashMap::new(),
            relation: Some(relation),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Relation the list is bound to, if any
    pub fn relation(&self) -> Option<&AnyRelation> {
        self.relation.as_ref()
    }

    /// Replace the held entities; cached collectors are dropped.
    pub fn set_entities(&mut self, entities: Vec<Entity>) -> &mut Self {
        self.entities = entities;
        self.collected.clear();
        self
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Entity> {
        self.entities.iter_mut()
    }

    /// Load relation `name` for every held entity and attach the results.
    ///
    /// The first call per name runs the batched collector; later calls
    /// re-attach from the cache without querying.
    ///
    /// # Errors
    ///
    /// - `UnknownRelation` when the repository declares no such relation
    /// - `MissingKey` when an entity lacks a key column of the relation
    /// - the executor's error when a batched query fails
    pub fn load(&mut self, name: &str) -> Result<&mut Self> {
        if !self.collected.contains_key(name) {
            let relation = self.registry.relation(self.repository.table(), name)?;
            let collected = relation.collect(&self.entities)?;
            self.collected.insert(name.to_string(), collected);
        }
        if let Some(collected) = self.collected.get(name) {
            for entity in self.entities.iter_mut() {
                let related = collected.related_for(entity)?;
                entity.set_related(name, related);
            }
        }
        Ok(self)
    }

    /// Load a dotted relation path such as `"posts.tags"`.
    ///
    /// Each segment is loaded in one batch over every entity reached by the
    /// previous segment.
    pub fn load_path(&mut self, path: &str) -> Result<&mut Self> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        self.load(head)?;
        let Some(rest) = rest else {
            return Ok(self);
        };

        let target = self
            .registry
            .relation(self.repository.table(), head)?
            .target()
            .clone();
        let mut counts = Vec::with_capacity(self.entities.len());
        let mut reached = Vec::new();
        for entity in &mut self.entities {
            let related = entity.take_related(head);
            counts.push(related.len());
            reached.extend(related);
        }

        let mut nested = EntityList::new(self.registry.clone(), target, reached);
        let loaded = nested.load_path(rest).map(|_| ());
        let mut reached = nested.into_entities().into_iter();
        for (entity, count) in self.entities.iter_mut().zip(counts) {
            entity.set_related(head, reached.by_ref().take(count).collect());
        }
        loaded?;
        Ok(self)
    }

    /// Every entity related to the held ones through `name`, in a list bound
    /// to that relation.
    pub fn relate(&mut self, name: &str) -> Result<EntityList> {
        self.load(name)?;
        let relation = self
            .registry
            .relation(self.repository.table(), name)?
            .with_entities(self.entities.clone());
        let related = self
            .entities
            .iter()
            .flat_map(|entity| entity.related(name).iter().cloned())
            .collect();
        Ok(EntityList::for_relation(
            self.registry.clone(),
            relation,
            related,
        ))
    }

    /// Entities passing `predicate`, in a new list of the same repository.
    pub fn filter<P>(&self, predicate: P) -> EntityList
    where
        P: Fn(&Entity) -> bool,
    {
        EntityList {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            entities: self.entities.iter().filter(|e| predicate(e)).cloned().collect(),
            collected: HashMap::new(),
            relation: self.relation.clone(),
        }
    }

    /// Visit every entity mutably.
    pub fn walk<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&mut Entity),
    {
        self.entities.iter_mut().for_each(f);
        self
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: Fn(&Entity) -> T,
    {
        self.entities.iter().map(f).collect()
    }

    /// Values of `column` across the list
    pub fn column(&self, column: &str) -> Vec<Value> {
        self.entities.iter().map(|e| e.get(column)).collect()
    }

    pub fn reduce<T, F>(&self, init: T, f: F) -> T
    where
        F: Fn(T, &Entity) -> T,
    {
        self.entities.iter().fold(init, f)
    }

    /// Numeric values of `column`, nulls skipped.
    ///
    /// # Errors
    ///
    /// `NumericType` on the first non-numeric value.
    fn numbers(&self, column: &str) -> Result<Vec<Value>> {
        self.entities
            .iter()
            .map(|entity| entity.get(column))
            .filter(|value| !value.is_null())
            .map(|value| match value.as_f64() {
                Some(_) => Ok(value),
                None => Err(TideError::NumericType {
                    column: column.to_string(),
                    value: value.to_string(),
                }),
            })
            .collect()
    }

    /// Sum of `column`: `Int` when every value is an integer, `Float`
    /// otherwise; `Int(0)` for an empty list.
    ///
    /// # Errors
    ///
    /// `NumericType` on a non-numeric value; nothing is coerced.
    pub fn sum(&self, column: &str) -> Result<Value> {
        let values = self.numbers(column)?;
        let ints: Option<i64> = values.iter().try_fold(0i64, |acc, value| match value {
            Value::Int(i) => acc.checked_add(*i),
            _ => None,
        });
        Ok(match ints {
            Some(total) => Value::Int(total),
            None => Value::Float(values.iter().filter_map(Value::as_f64).sum()),
        })
    }

    /// Largest value of `column`, `Null` for an empty list.
    pub fn max(&self, column: &str) -> Result<Value> {
        self.extreme(column, |candidate, best| candidate > best)
    }

    /// Smallest value of `column`, `Null` for an empty list.
    pub fn min(&self, column: &str) -> Result<Value> {
        self.extreme(column, |candidate, best| candidate < best)
    }

    fn extreme(&self, column: &str, better: fn(f64, f64) -> bool) -> Result<Value> {
        let mut best: Option<(f64, Value)> = None;
        for value in self.numbers(column)? {
            let number = value.as_f64().unwrap_or_default();
            match &best {
                Some((current, _)) if !better(number, *current) => {}
                _ => best = Some((number, value)),
            }
        }
        Ok(best.map(|(_, value)| value).unwrap_or_default())
    }

    fn bound_relation(&mut self, action: &str) -> Result<&mut AnyRelation> {
        let table = self.repository.table().to_string();
        self.relation.as_mut().ok_or_else(|| {
            TideError::InvalidArgument(format!(
                "cannot {action} on a list of {table} that is not bound to a relation"
            ))
        })
    }

    /// Add `entity` to a relation-bound list and persist the link.
    ///
    /// - join: the target is saved first when new, then the join row is
    ///   inserted
    /// - has-many / has-one: the foreign key is set on `entity`, which is
    ///   then saved
    /// - belongs-to: `entity` is saved when new, then the foreign key is set
    ///   on the bound sources, which are saved
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the list is not bound to a relation.
    pub fn add(&mut self, mut entity: Entity) -> Result<&mut Self> {
        let relation = self.bound_relation("add")?;
        let target = relation.target().clone();
        match relation.kind() {
            None => {
                if !entity.is_fetched() {
                    target.save(&mut entity)?;
                }
                relation.relate(&mut entity)?;
            }
            Some(RelationKind::BelongsTo) => {
                if !entity.is_fetched() {
                    target.save(&mut entity)?;
                }
                relation.relate(&mut entity)?;
                let source = relation.source().clone();
                for bound in relation.entities_mut() {
                    source.save(bound)?;
                }
            }
            Some(RelationKind::HasMany | RelationKind::HasOne) => {
                relation.relate(&mut entity)?;
                target.save(&mut entity)?;
            }
        }
        self.entities.push(entity);
        self.collected.clear();
        Ok(self)
    }

    /// Remove `entity` from a relation-bound list and persist the removal.
    ///
    /// Join relations delete the join rows, has-many and has-one delete the
    /// target row, belongs-to clears the foreign key on the bound source and
    /// keeps the target. Returns whether the store changed anything.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the list is not bound to a relation.
    pub fn delete(&mut self, entity: &Entity) -> Result<bool> {
        let removed = self.bound_relation("delete")?.delete(entity)?;
        self.entities.retain(|held| held != entity);
        self.collected.clear();
        Ok(removed)
    }
}

impl Index<usize> for EntityList {
    type Output = Entity;

    fn index(&self, index: usize) -> &Entity {
        &self.entities[index]
    }
}

impl IntoIterator for EntityList {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntityList {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

impl<'a> IntoIterator for &'a mut EntityList {
    type Item = &'a mut Entity;
    type IntoIter = std::slice::IterMut<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MemoryExecutor, Statement};
    use crate::registry::RegistryBuilder;
    use crate::relation::RelationSpec;
    use crate::repository::RepositoryDef;
    use crate::row;
    use crate::value::Row;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn registry() -> (Arc<MemoryExecutor>, Registry) {
        let db = Arc::new(MemoryExecutor::new());
        db.seed(
            "users",
            vec![
                row! { "id" => 1, "name" => "Ann", "age" => 31 },
                row! { "id" => 2, "name" => "Ben", "age" => 17 },
                row! { "id" => 3, "name" => "Cid", "age" => Value::Null },
            ],
        );
        db.seed(
            "posts",
            vec![
                row! { "post_id" => 1, "user_id" => 1 },
                row! { "post_id" => 2, "user_id" => 2 },
                row! { "post_id" => 3, "user_id" => 2 },
            ],
        );
        db.create_table("posts", Some("post_id"));
        let registry = RegistryBuilder::new(db.clone())
            .repository(
                RepositoryDef::new("users")
                    .relation("posts", RelationSpec::has_many("posts").with_convert(&[("id", "user_id")])),
            )
            .repository(
                RepositoryDef::new("posts")
                    .primary_keys(&["post_id"])
                    .auto_increment(true)
                    .relation("author", RelationSpec::belongs_to("users").with_convert(&[("user_id", "id")])),
            )
            .build()
            .unwrap();
        (db, registry)
    }

    #[test]
    fn test_load_is_cached_per_name() {
        let (db, registry) = registry();
        let mut users = registry.find("users", &Row::new()).unwrap();
        db.clear_history();
        users.load("posts").unwrap();
        users.load("posts").unwrap();
        assert_eq!(db.query_count(), 1);
        assert_eq!(users[1].related("posts").len(), 2);
        assert!(users[2].related("posts").is_empty());
        assert!(users[2].has_related("posts"));
    }

    #[test]
    fn test_set_entities_drops_the_cache() {
        let (db, registry) = registry();
        let mut users = registry.find("users", &Row::new()).unwrap();
        users.load("posts").unwrap();
        let first = users.filter(|u| u.get("id") == Value::Int(1)).into_entities();
        db.clear_history();
        users.set_entities(first).load("posts").unwrap();
        assert_eq!(db.query_count(), 1);
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_unknown_relation() {
        let (_db, registry) = registry();
        let mut users = registry.find("users", &Row::new()).unwrap();
        assert!(matches!(
            users.load("comments"),
            Err(TideError::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_aggregates() {
        let (_db, registry) = registry();
        let users = registry.find("users", &Row::new()).unwrap();
        assert_eq!(users.sum("age").unwrap(), Value::Int(48));
        assert_eq!(users.max("age").unwrap(), Value::Int(31));
        assert_eq!(users.min("age").unwrap(), Value::Int(17));
        assert_eq!(users.sum("missing").unwrap(), Value::Int(0));
        assert_eq!(users.max("missing").unwrap(), Value::Null);

        let mut mixed = users.clone();
        mixed.walk(|u| {
            u.set("score", 0.5);
        });
        assert_eq!(mixed.sum("score").unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_sum_refuses_text() {
        let (_db, registry) = registry();
        let users = registry.find("users", &Row::new()).unwrap();
        match users.sum("name") {
            Err(TideError::NumericType { column, value }) => {
                assert_eq!(column, "name");
                assert_eq!(value, "'Ann'");
            }
            other => panic!("expected NumericType, got {other:?}"),
        }
        assert!(users.max("name").is_err());
    }

    #[test]
    fn test_functional_helpers() {
        let (_db, registry) = registry();
        let users = registry.find("users", &Row::new()).unwrap();
        let adults = users.filter(|u| u.get("age").as_i64().is_some_and(|a| a >= 18));
        assert_eq!(adults.column("name"), vec![Value::from("Ann")]);
        assert_eq!(users.map(|u| u.get("id")).len(), 3);
        let names = users.reduce(String::new(), |acc, u| acc + u.get("name").as_str().unwrap_or(""));
        assert_eq!(names, "AnnBenCid");
        assert_eq!((&users).into_iter().count(), 3);
        assert_eq!(users.get(5), None);
    }

    #[test]
    fn test_unbound_add_and_delete_fail() {
        let (_db, registry) = registry();
        let mut users = registry.find("users", &Row::new()).unwrap();
        let ann = users[0].clone();
        assert!(matches!(users.delete(&ann), Err(TideError::InvalidArgument(_))));
        assert!(matches!(users.add(ann), Err(TideError::InvalidArgument(_))));
    }

    #[test]
    fn test_has_many_add_sets_fk_and_saves() {
        let (db, registry) = registry();
        let ann = registry.repository("users").unwrap().find_by_key(1).unwrap().unwrap();
        let mut posts = registry.related_list("posts", &ann).unwrap();
        let post = registry.repository("posts").unwrap().create(row! { "title" => "new" });
        posts.add(post).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].get("user_id"), Value::Int(1));
        assert_eq!(posts[1].get("post_id"), Value::Int(4));
        assert!(matches!(
            db.statements().iter().rev().find(|s| matches!(s, Statement::Insert { .. })),
            Some(Statement::Insert { data, .. }) if data == &row! { "title" => "new", "user_id" => 1 }
        ));
    }

    #[test]
    fn test_belongs_to_add_updates_sources() {
        let (db, registry) = registry();
        let post = registry.repository("posts").unwrap().find_by_key(1).unwrap().unwrap();
        let mut author = registry.related_list("author", &post).unwrap();
        let ben = registry.repository("users").unwrap().find_by_key(2).unwrap().unwrap();
        author.add(ben).unwrap();
        let stored = db.rows("posts");
        assert_eq!(stored[0].get("user_id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_bound_delete_removes_target() {
        let (db, registry) = registry();
        let ben = registry.repository("users").unwrap().find_by_key(2).unwrap().unwrap();
        let mut posts = registry.related_list("posts", &ben).unwrap();
        let doomed = posts[0].clone();
        assert!(posts.delete(&doomed).unwrap());
        assert_eq!(posts.len(), 1);
        assert_eq!(db.rows("posts").len(), 2);
    }
}
