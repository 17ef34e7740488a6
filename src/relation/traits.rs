//! Core traits for entity relationships.
//!
//! [`RelationTrait`] is the contract shared by simple relations and join
//! relations: bind source entities, build the target query, and perform the
//! write-side linking. [`AnyRelation`] wraps both so that callers resolving
//! relations by name can dispatch on the variant instead of on a runtime type.

use super::eager::{Collected, Joined, Related};
use super::{JoinRelation, Relation, RelationKind};
use crate::entity::Entity;
use crate::query::Query;
use crate::repository::Repository;
use crate::value::Row;
use crate::Result;

/// Behaviour shared by every relation descriptor
///
/// Binding never mutates a descriptor: [`RelationTrait::with_entities`]
/// returns an independent copy, so the same descriptor can be reused from
/// several call sites.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tideline::{row, MemoryExecutor, Relation, RelationTrait, Repository, RepositoryDef};
///
/// let db = Arc::new(MemoryExecutor::new());
/// db.seed("users", vec![row! { "id" => 1 }]);
/// db.seed("posts", vec![row! { "post_id" => 1, "user_id" => 1 }]);
/// let users = Repository::new(RepositoryDef::new("users"), db.clone());
/// let posts = Repository::new(RepositoryDef::new("posts").primary_keys(&["post_id"]), db);
///
/// let user = users.find_by_key(1)?.unwrap();
/// let relation = Relation::has_many(users, posts).with_convert_pairs(&[("id", "user_id")]);
/// assert_eq!(relation.with_entity(&user).count(&row! {})?, 1);
/// # Ok::<(), tideline::TideError>(())
/// ```
pub trait RelationTrait {
    /// Repository of the entities the relation starts from
    fn source(&self) -> &Repository;

    /// Repository of the entities the relation resolves to
    fn target(&self) -> &Repository;

    /// Bound source entities
    fn entities(&self) -> &[Entity];

    /// Copy of this relation bound to `entities`.
    fn with_entities(&self, entities: Vec<Entity>) -> Self
    where
        Self: Sized;

    /// Copy of this relation bound to a single source entity.
    fn with_entity(&self, entity: &Entity) -> Self
    where
        Self: Sized,
    {
        self.with_entities(vec![entity.clone()])
    }

    /// Target query filtered by the keys of every bound source entity.
    fn query(&self) -> Result<Query>;

    /// Related entities of the bound sources matching `keys`.
    fn find(&self, keys: &Row) -> Result<Vec<Entity>> {
        self.query()?.find(keys)
    }

    fn count(&self, keys: &Row) -> Result<u64> {
        self.query()?.count(keys)
    }

    /// Link `target` to the bound source.
    ///
    /// Only the in-memory key columns change for simple relations; the
    /// caller persists them. Join relations insert the join row.
    fn relate(&mut self, target: &mut Entity) -> Result<()>;

    /// Remove the association with `target`.
    fn delete(&mut self, target: &Entity) -> Result<bool>;
}

/// A relation of either shape, as resolved from a
/// [`RelationSpec`](super::RelationSpec)
#[derive(Debug, Clone)]
pub enum AnyRelation {
    Simple(Relation),
    Join(JoinRelation),
}

impl AnyRelation {
    pub fn is_join(&self) -> bool {
        matches!(self, AnyRelation::Join(_))
    }

    /// Kind of a simple relation; `None` for join relations
    pub fn kind(&self) -> Option<RelationKind> {
        match self {
            AnyRelation::Simple(relation) => Some(relation.kind()),
            AnyRelation::Join(_) => None,
        }
    }

    /// Batch-resolve the relation for `sources` with the collector matching
    /// its shape: one query for simple relations, at most two for joins.
    pub fn collect(&self, sources: &[Entity]) -> Result<Collected> {
        match self {
            AnyRelation::Simple(relation) => Ok(Collected::Related(Related::load(relation, sources)?)),
            AnyRelation::Join(relation) => Ok(Collected::Joined(Joined::load(relation, sources)?)),
        }
    }

    /// Entities bound to the relation after write-side linking
    pub fn entities_mut(&mut self) -> &mut Vec<Entity> {
        match self {
            AnyRelation::Simple(relation) => relation.entities_mut(),
            AnyRelation::Join(relation) => relation.entities_mut(),
        }
    }
}

impl RelationTrait for AnyRelation {
    fn source(&self) -> &Repository {
        match self {
            AnyRelation::Simple(r) => r.source(),
            AnyRelation::Join(r) => r.source(),
        }
    }

    fn target(&self) -> &Repository {
        match self {
            AnyRelation::Simple(r) => r.target(),
            AnyRelation::Join(r) => r.target(),
        }
    }

    fn entities(&self) -> &[Entity] {
        match self {
            AnyRelation::Simple(r) => r.entities(),
            AnyRelation::Join(r) => r.entities(),
        }
    }

    fn with_entities(&self, entities: Vec<Entity>) -> Self {
        match self {
            AnyRelation::Simple(r) => AnyRelation::Simple(r.with_entities(entities)),
            AnyRelation::Join(r) => AnyRelation::Join(r.with_entities(entities)),
        }
    }

    fn query(&self) -> Result<Query> {
        match self {
            AnyRelation::Simple(r) => r.query(),
            AnyRelation::Join(r) => r.query(),
        }
    }

    fn relate(&mut self, target: &mut Entity) -> Result<()> {
        match self {
            AnyRelation::Simple(r) => r.relate(target),
            AnyRelation::Join(r) => r.relate(target),
        }
    }

    fn delete(&mut self, target: &Entity) -> Result<bool> {
        match self {
            AnyRelation::Simple(r) => r.delete(target),
            AnyRelation::Join(r) => r.delete(target),
        }
    }
}

impl From<Relation> for AnyRelation {
    fn from(relation: Relation) -> Self {
        AnyRelation::Simple(relation)
    }
}

impl From<JoinRelation> for AnyRelation {
    fn from(relation: JoinRelation) -> Self {
        AnyRelation::Join(relation)
    }
}
