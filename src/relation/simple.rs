//! Has-one, has-many and belongs-to relations.
//!
//! The three kinds share one key-conversion model: `convert` maps a source
//! column to a target column, and the target keys of a source entity are
//! `{target_column: source[source_column]}` for every pair. The kinds differ
//! in the default map and in which side [`RelationTrait::relate`] writes to.
//!
//! | kind         | default `convert`              | `relate` writes to |
//! |--------------|--------------------------------|--------------------|
//! | `HasMany`    | identity over source keys      | target             |
//! | `HasOne`     | identity over target keys      | target             |
//! | `BelongsTo`  | identity over target keys      | bound source(s)    |
//!
//! `delete` mirrors `relate`: `HasMany`/`HasOne` delete the target row,
//! `BelongsTo` clears the foreign key on the bound source(s) and keeps the
//! target.
//!
//! `HasOne` never enforces a single result; callers treat it as singular.

use super::def::{column_map, identity_map, inverted};
use super::{RelationKind, RelationTrait};
use crate::entity::{ColumnMap, Entity};
use crate::query::{Condition, Query};
use crate::relation::Identity;
use crate::repository::Repository;
use crate::value::{Row, Value};
use crate::{Result, TideError};
use std::collections::HashSet;

/// Key-conversion descriptor between two repositories
#[derive(Debug, Clone)]
pub struct Relation {
    kind: RelationKind,
    source: Repository,
    target: Repository,
    convert: ColumnMap,
    condition: Condition,
    entities: Vec<Entity>,
}

impl Relation {
    /// Relation of `kind` with the default conversion for that kind.
    pub fn new(kind: RelationKind, source: Repository, target: Repository) -> Self {
        let convert = match kind {
            RelationKind::HasMany => identity_map(source.primary_keys()),
            RelationKind::HasOne | RelationKind::BelongsTo => identity_map(target.primary_keys()),
        };
        Self {
            kind,
            source,
            target,
            convert,
            condition: Condition::always(),
            entities: Vec::new(),
        }
    }

    pub fn has_one(source: Repository, target: Repository) -> Self {
        Self::new(RelationKind::HasOne, source, target)
    }

    pub fn has_many(source: Repository, target: Repository) -> Self {
        Self::new(RelationKind::HasMany, source, target)
    }

    pub fn belongs_to(source: Repository, target: Repository) -> Self {
        Self::new(RelationKind::BelongsTo, source, target)
    }

    /// Replace the source-to-target column map.
    pub fn with_convert(mut self, convert: ColumnMap) -> Self {
        self.convert = convert;
        self
    }

    pub fn with_convert_pairs(self, pairs: &[(&str, &str)]) -> Self {
        self.with_convert(column_map(pairs))
    }

    /// AND a static condition into every target query.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = std::mem::take(&mut self.condition).and(condition);
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn convert(&self) -> &ColumnMap {
        &self.convert
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub(crate) fn entities_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.entities
    }

    /// Copy of the descriptor with no bound entity
    pub(crate) fn with_entities_cleared(&self) -> Self {
        self.with_entities(Vec::new())
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> String {
        format!("{}->{}", self.source.table(), self.target.table())
    }

    /// Converted keys correlating `entity` (a source entity) to its targets.
    ///
    /// Pure: reads only `entity`'s data and the conversion map.
    ///
    /// # Errors
    ///
    /// `MissingKey` when `entity` lacks a source column of the map.
    pub fn target_keys(&self, entity: &Entity) -> Result<Row> {
        self.convert
            .iter()
            .map(|(from, to)| {
                entity
                    .raw(from)
                    .map(|value| (to.clone(), value.clone()))
                    .ok_or_else(|| TideError::missing_key(entity.table(), from))
            })
            .collect()
    }

    /// Target query OR-ing the given key mappings, plus the static condition.
    pub(crate) fn query_keys(&self, keys: &[Row]) -> Query {
        self.target
            .query()
            .condition(self.condition.clone())
            .condition(Condition::any_of_keys(keys))
    }

    /// Converted keys of every bound entity, deduplicated by flattened key.
    pub(crate) fn distinct_target_keys(&self, entities: &[Entity]) -> Result<(Option<Identity>, Vec<Row>)> {
        let Some(first) = entities.first() else {
            return Ok((None, Vec::new()));
        };
        let identity = Identity::of(&self.target_keys(first)?);
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(entities.len());
        for entity in entities {
            let converted = identity.project(entity.table(), &self.target_keys(entity)?)?;
            if seen.insert(identity.flatten(entity.table(), &converted)?) {
                keys.push(converted);
            }
        }
        Ok((Some(identity), keys))
    }

    fn bound_source(&self) -> Result<&Entity> {
        self.entities.first().ok_or_else(|| {
            TideError::IllegalState(format!("relation {} has no bound source entity", self.label()))
        })
    }
}

impl RelationTrait for Relation {
    fn source(&self) -> &Repository {
        &self.source
    }

    fn target(&self) -> &Repository {
        &self.target
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn with_entities(&self, entities: Vec<Entity>) -> Self {
        Self {
            entities,
            ..self.clone()
        }
    }

    /// With no bound entity the query is the unfiltered target query plus the
    /// static condition.
    fn query(&self) -> Result<Query> {
        if self.entities.is_empty() {
            return Ok(self.target.query().condition(self.condition.clone()));
        }
        let (_, keys) = self.distinct_target_keys(&self.entities)?;
        Ok(self.query_keys(&keys))
    }

    /// `HasMany`/`HasOne` copy the first bound source's keys onto `target`;
    /// `BelongsTo` copies `target`'s keys onto every bound source.
    fn relate(&mut self, target: &mut Entity) -> Result<()> {
        if self.kind == RelationKind::BelongsTo {
            self.bound_source()?;
            let convert = inverted(&self.convert);
            for source in &mut self.entities {
                source.relate(target, &convert)?;
            }
        } else {
            let source = self.bound_source()?.clone();
            target.relate(&source, &self.convert)?;
        }
        Ok(())
    }

    /// `HasMany`/`HasOne` delete the target row through the target
    /// repository.
    ///
    /// `BelongsTo` never touches the target: every bound source pointing at
    /// `target` gets its foreign key cleared and saved. Returns whether any
    /// source was unlinked.
    fn delete(&mut self, target: &Entity) -> Result<bool> {
        if self.kind != RelationKind::BelongsTo {
            return self.target.delete(target);
        }
        self.bound_source()?;
        let mut unlinked = false;
        for source in &mut self.entities {
            let points_at_target = self.convert.iter().all(|(from, to)| {
                matches!(
                    (source.raw(from), target.raw(to)),
                    (Some(own), Some(theirs)) if own.loosely_eq(theirs)
                )
            });
            if !points_at_target {
                continue;
            }
            for from in self.convert.keys() {
                source.set(from.clone(), Value::Null);
            }
            unlinked |= self.source.save(source)?;
        }
        Ok(unlinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MemoryExecutor, Statement};
    use crate::repository::RepositoryDef;
    use crate::row;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn blog() -> (Arc<MemoryExecutor>, Repository, Repository) {
        let db = Arc::new(MemoryExecutor::new());
        db.seed(
            "users",
            vec![row! { "id" => 1, "name" => "Ann" }, row! { "id" => 2, "name" => "Ben" }],
        );
        db.seed(
            "posts",
            vec![
                row! { "post_id" => 1, "user_id" => 1, "title" => "a" },
                row! { "post_id" => 2, "user_id" => 2, "title" => "b" },
                row! { "post_id" => 3, "user_id" => 2, "title" => "c" },
            ],
        );
        let users = Repository::new(RepositoryDef::new("users"), db.clone());
        let posts = Repository::new(
            RepositoryDef::new("posts").primary_keys(&["post_id"]).auto_increment(true),
            db.clone(),
        );
        (db, users, posts)
    }

    #[test]
    fn test_default_converts_follow_kind() {
        let (_db, users, posts) = blog();
        let many = Relation::has_many(users.clone(), posts.clone());
        assert_eq!(many.convert(), &column_map(&[("id", "id")]));
        let belongs = Relation::belongs_to(posts.clone(), users.clone());
        assert_eq!(belongs.convert(), &column_map(&[("id", "id")]));
        let one = Relation::has_one(users, posts);
        assert_eq!(one.convert(), &column_map(&[("post_id", "post_id")]));
    }

    #[test]
    fn test_with_entity_copies() {
        let (_db, users, posts) = blog();
        let relation = Relation::has_many(users.clone(), posts).with_convert_pairs(&[("id", "user_id")]);
        let user = users.find_by_key(2).unwrap().unwrap();
        let bound = relation.with_entity(&user);
        assert!(relation.entities().is_empty());
        assert_eq!(bound.entities().len(), 1);
        assert_eq!(bound.find(&Row::new()).unwrap().len(), 2);
        assert_eq!(bound.count(&row! { "title" => "c" }).unwrap(), 1);
    }

    #[test]
    fn test_target_keys_are_pure() {
        let (_db, users, posts) = blog();
        let relation = Relation::has_many(users.clone(), posts).with_convert_pairs(&[("id", "user_id")]);
        let user = users.find_by_key(1).unwrap().unwrap();
        let first = relation.target_keys(&user).unwrap();
        assert_eq!(first, relation.target_keys(&user).unwrap());
        assert_eq!(first, row! { "user_id" => 1 });

        let stranger = Entity::detached("users", &["id"]);
        assert!(matches!(
            relation.target_keys(&stranger),
            Err(TideError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_query_ors_bound_sources() {
        let (db, users, posts) = blog();
        let relation = Relation::has_many(users.clone(), posts).with_convert_pairs(&[("id", "user_id")]);
        let all = users.find(&Row::new()).unwrap();
        db.clear_history();
        let found = relation.with_entities(all).find(&Row::new()).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_unbound_query_is_unfiltered_plus_condition() {
        let (_db, users, posts) = blog();
        let relation = Relation::has_many(users, posts)
            .with_convert_pairs(&[("id", "user_id")])
            .with_condition(Condition::eq("user_id", 2));
        assert_eq!(relation.count(&Row::new()).unwrap(), 2);
    }

    #[test]
    fn test_has_many_relate_sets_fk_on_target() {
        let (db, users, posts) = blog();
        let user = users.find_by_key(1).unwrap().unwrap();
        let mut relation = Relation::has_many(users, posts.clone())
            .with_convert_pairs(&[("id", "user_id")])
            .with_entity(&user);
        let mut post = posts.create(row! { "title" => "new" });
        relation.relate(&mut post).unwrap();
        assert_eq!(post.get("user_id"), Value::Int(1));
        assert!(!post.is_fetched());
        assert!(db.statements().iter().all(|s| !matches!(s, Statement::Insert { .. })));
    }

    #[test]
    fn test_belongs_to_delete_unlinks_and_keeps_the_parent() {
        let (db, users, posts) = blog();
        let post = posts.find_by_key(2).unwrap().unwrap();
        let ann = users.find_by_key(1).unwrap().unwrap();
        let ben = users.find_by_key(2).unwrap().unwrap();
        let mut relation = Relation::belongs_to(posts, users)
            .with_convert_pairs(&[("user_id", "id")])
            .with_entity(&post);

        assert!(!relation.delete(&ann).unwrap());
        assert!(relation.delete(&ben).unwrap());
        assert_eq!(relation.entities()[0].get("user_id"), Value::Null);
        assert_eq!(db.rows("users").len(), 2);
        let stored = db.rows("posts");
        assert_eq!(stored[1].get("user_id"), Some(&Value::Null));
        assert_eq!(stored[2].get("user_id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_has_many_delete_removes_the_target_row() {
        let (db, users, posts) = blog();
        let user = users.find_by_key(2).unwrap().unwrap();
        let post = posts.find_by_key(3).unwrap().unwrap();
        let mut relation = Relation::has_many(users, posts)
            .with_convert_pairs(&[("id", "user_id")])
            .with_entity(&user);
        assert!(relation.delete(&post).unwrap());
        assert_eq!(db.rows("posts").len(), 2);
    }

    #[test]
    fn test_belongs_to_relate_sets_fk_on_source() {
        let (_db, users, posts) = blog();
        let post = posts.find_by_key(1).unwrap().unwrap();
        let ben = users.find_by_key(2).unwrap().unwrap();
        let mut relation = Relation::belongs_to(posts, users)
            .with_convert_pairs(&[("user_id", "id")])
            .with_entity(&post);
        let mut target = ben.clone();
        relation.relate(&mut target).unwrap();
        assert_eq!(relation.entities()[0].get("user_id"), Value::Int(2));
        assert_eq!(relation.entities()[0].updated_data(), row! { "user_id" => 2 });
        assert_eq!(post.get("user_id"), Value::Int(1));
    }

    #[test]
    fn test_relate_needs_a_bound_source() {
        let (_db, users, posts) = blog();
        let mut relation = Relation::has_many(users, posts.clone());
        let mut post = posts.create(Row::new());
        assert!(matches!(
            relation.relate(&mut post),
            Err(TideError::IllegalState(_))
        ));
    }

    #[test]
    fn test_delete_removes_target_row() {
        let (db, users, posts) = blog();
        let mut relation = Relation::has_many(users, posts.clone()).with_convert_pairs(&[("id", "user_id")]);
        let post = posts.find_by_key(3).unwrap().unwrap();
        assert!(relation.delete(&post).unwrap());
        assert_eq!(db.rows("posts").len(), 2);
    }
}
