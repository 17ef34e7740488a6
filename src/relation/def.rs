//! Relation definitions
//!
//! A [`RelationSpec`] is the declarative, serializable form of a relation:
//! it names the target (and join) table by name and carries the column maps.
//! Repositories keep a name-to-spec map; the [`Registry`] turns a spec into
//! a live [`Relation`] or [`JoinRelation`] by resolving the table names to
//! repositories.
//!
//! In configuration a spec is a table tagged by `kind`:
//!
//! ```toml
//! [posts]
//! kind = "has_many"
//! target = "posts"
//! convert = { id = "user_id" }
//!
//! [tags]
//! kind = "join"
//! join = "posts_tags"
//! target = "tags"
//! ```

use super::{AnyRelation, JoinRelation, Relation};
use crate::entity::ColumnMap;
use crate::registry::Registry;
use crate::repository::Repository;
use crate::value::Row;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Direction of a simple relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Source carries the foreign key; at most one target is expected
    HasOne,
    /// Target rows carry the foreign key
    HasMany,
    /// Source carries the foreign key; target owns the "one"
    BelongsTo,
}

impl RelationKind {
    /// True when the source side holds the foreign key columns.
    pub fn source_holds_key(self) -> bool {
        matches!(self, RelationKind::HasOne | RelationKind::BelongsTo)
    }
}

/// Spec of a has-one, has-many or belongs-to relation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleSpec {
    /// Target table
    pub target: String,
    /// Source column to target column; empty means the default for the kind
    #[serde(default)]
    pub convert: ColumnMap,
    /// Additional static equality filter on the target
    #[serde(default)]
    pub condition: Row,
}

/// Spec of a many-to-many relation through a join table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Join table
    pub join: String,
    /// Target table
    pub target: String,
    /// Source column to join-table column; empty means identity over the
    /// source's primary keys
    #[serde(default)]
    pub from_convert: ColumnMap,
    /// Join-table column to target column; empty means identity over the
    /// target's primary keys
    #[serde(default)]
    pub to_convert: ColumnMap,
    #[serde(default)]
    pub condition: Row,
}

/// Declarative relation, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationSpec {
    HasOne(SimpleSpec),
    HasMany(SimpleSpec),
    BelongsTo(SimpleSpec),
    Join(JoinSpec),
}

impl RelationSpec {
    pub fn has_one(target: impl Into<String>) -> Self {
        RelationSpec::HasOne(SimpleSpec::to(target))
    }

    pub fn has_many(target: impl Into<String>) -> Self {
        RelationSpec::HasMany(SimpleSpec::to(target))
    }

    pub fn belongs_to(target: impl Into<String>) -> Self {
        RelationSpec::BelongsTo(SimpleSpec::to(target))
    }

    pub fn join(join: impl Into<String>, target: impl Into<String>) -> Self {
        RelationSpec::Join(JoinSpec {
            join: join.into(),
            target: target.into(),
            ..JoinSpec::default()
        })
    }

    /// Replace the column map(s).
    ///
    /// For join specs `pairs` is the source-to-join map; use
    /// [`RelationSpec::with_to_convert`] for the other hop.
    pub fn with_convert(mut self, pairs: &[(&str, &str)]) -> Self {
        let map = column_map(pairs);
        match &mut self {
            RelationSpec::HasOne(spec) | RelationSpec::HasMany(spec) | RelationSpec::BelongsTo(spec) => {
                spec.convert = map;
            }
            RelationSpec::Join(spec) => spec.from_convert = map,
        }
        self
    }

    /// Replace the join-to-target map of a join spec; no-op on simple specs.
    pub fn with_to_convert(mut self, pairs: &[(&str, &str)]) -> Self {
        if let RelationSpec::Join(spec) = &mut self {
            spec.to_convert = column_map(pairs);
        }
        self
    }

    pub fn with_condition(mut self, condition: Row) -> Self {
        match &mut self {
            RelationSpec::HasOne(spec) | RelationSpec::HasMany(spec) | RelationSpec::BelongsTo(spec) => {
                spec.condition = condition;
            }
            RelationSpec::Join(spec) => spec.condition = condition,
        }
        self
    }

    /// Name of the table the relation resolves to
    pub fn target(&self) -> &str {
        match self {
            RelationSpec::HasOne(spec) | RelationSpec::HasMany(spec) | RelationSpec::BelongsTo(spec) => {
                &spec.target
            }
            RelationSpec::Join(spec) => &spec.target,
        }
    }

    /// Resolve into a live relation with `source` as the source repository.
    ///
    /// # Errors
    ///
    /// - `UnknownRepository` when a named table is not registered
    /// - `InvalidArgument` for a join spec whose column maps collide
    pub fn build(&self, source: &Repository, registry: &Registry) -> Result<AnyRelation> {
        let simple = |kind: RelationKind, spec: &SimpleSpec| -> Result<AnyRelation> {
            let target = registry.repository(&spec.target)?.clone();
            let mut relation = Relation::new(kind, source.clone(), target);
            if !spec.convert.is_empty() {
                relation = relation.with_convert(spec.convert.clone());
            }
            Ok(AnyRelation::Simple(relation.with_condition(spec.condition.clone().into())))
        };
        match self {
            RelationSpec::HasOne(spec) => simple(RelationKind::HasOne, spec),
            RelationSpec::HasMany(spec) => simple(RelationKind::HasMany, spec),
            RelationSpec::BelongsTo(spec) => simple(RelationKind::BelongsTo, spec),
            RelationSpec::Join(spec) => {
                let join = registry.repository(&spec.join)?.clone();
                let target = registry.repository(&spec.target)?.clone();
                let from = if spec.from_convert.is_empty() {
                    identity_map(source.primary_keys())
                } else {
                    spec.from_convert.clone()
                };
                let to = if spec.to_convert.is_empty() {
                    identity_map(target.primary_keys())
                } else {
                    spec.to_convert.clone()
                };
                let relation = JoinRelation::with_maps(source.clone(), join, target, from, to)?;
                Ok(AnyRelation::Join(
                    relation.with_condition(spec.condition.clone().into()),
                ))
            }
        }
    }
}

impl SimpleSpec {
    fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

/// Build a [`ColumnMap`] from `(from, to)` pairs.
pub fn column_map(pairs: &[(&str, &str)]) -> ColumnMap {
    pairs
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect()
}

/// Identity map over `columns`.
pub fn identity_map(columns: &[String]) -> ColumnMap {
    columns.iter().map(|c| (c.clone(), c.clone())).collect()
}

/// Map with keys and values swapped.
pub fn inverted(map: &ColumnMap) -> ColumnMap {
    map.iter().map(|(from, to)| (to.clone(), from.clone())).collect()
}
