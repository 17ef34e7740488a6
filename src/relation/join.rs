//! Many-to-many relations through a join table.
//!
//! A [`JoinRelation`] converts keys twice: `from_convert` maps source columns
//! to join-table columns and `to_convert` maps join-table columns to target
//! columns. Reading takes two hops (join rows first, then targets); writing
//! inserts or deletes join rows only, never touching source or target rows.

use super::def::{identity_map, inverted};
use super::RelationTrait;
use crate::entity::{ColumnMap, Entity};
use crate::query::{Condition, Query};
use crate::relation::Identity;
use crate::repository::Repository;
use crate::value::Row;
use crate::{Result, TideError};
use std::collections::HashSet;

/// Many-to-many descriptor through a join-table repository
#[derive(Debug, Clone)]
pub struct JoinRelation {
    source: Repository,
    join: Repository,
    target: Repository,
    from_convert: ColumnMap,
    to_convert: ColumnMap,
    condition: Condition,
    entities: Vec<Entity>,
}

impl JoinRelation {
    /// Join relation with identity maps over the source and target keys.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the identity maps land on the same join-table
    /// column (e.g. both tables are keyed by `id`); use
    /// [`JoinRelation::with_converts`] to rename them.
    pub fn new(source: Repository, join: Repository, target: Repository) -> Result<Self> {
        let from_convert = identity_map(source.primary_keys());
        let to_convert = identity_map(target.primary_keys());
        Self::with_maps(source, join, target, from_convert, to_convert)
    }

    /// Join relation with explicit source-to-join and join-to-target maps.
    pub fn with_maps(
        source: Repository,
        join: Repository,
        target: Repository,
        from_convert: ColumnMap,
        to_convert: ColumnMap,
    ) -> Result<Self> {
        Self {
            source,
            join,
            target,
            from_convert: ColumnMap::new(),
            to_convert: ColumnMap::new(),
            condition: Condition::always(),
            entities: Vec::new(),
        }
        .with_converts(from_convert, to_convert)
    }

    /// Replace both column maps.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a join-table column appears on both sides.
    pub fn with_converts(mut self, from_convert: ColumnMap, to_convert: ColumnMap) -> Result<Self> {
        let join_side: HashSet<&String> = from_convert.values().collect();
        if let Some(column) = to_convert.keys().find(|column| join_side.contains(column)) {
            return Err(TideError::InvalidArgument(format!(
                "join table {} column '{column}' is mapped from both {} and {}",
                self.join.table(),
                self.source.table(),
                self.target.table()
            )));
        }
        self.from_convert = from_convert;
        self.to_convert = to_convert;
        Ok(self)
    }

    /// AND a static condition into the target query.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = std::mem::take(&mut self.condition).and(condition);
        self
    }

    pub fn join(&self) -> &Repository {
        &self.join
    }

    pub fn from_convert(&self) -> &ColumnMap {
        &self.from_convert
    }

    pub fn to_convert(&self) -> &ColumnMap {
        &self.to_convert
    }

    pub(crate) fn entities_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.entities
    }

    /// Copy of the descriptor with no bound entity
    pub(crate) fn with_entities_cleared(&self) -> Self {
        self.with_entities(Vec::new())
    }

    pub fn label(&self) -> String {
        format!(
            "{}->{}->{}",
            self.source.table(),
            self.join.table(),
            self.target.table()
        )
    }

    /// Join-table columns correlating a source entity.
    pub fn join_keys(&self, source: &Entity) -> Result<Row> {
        convert_row(&self.from_convert, source.table(), source.data())
    }

    /// Target columns correlating a join-table row.
    pub fn target_keys(&self, join_row: &Row) -> Result<Row> {
        convert_row(&self.to_convert, self.join.table(), join_row)
    }

    /// Join-table columns correlating a target entity.
    fn join_keys_of_target(&self, target: &Entity) -> Result<Row> {
        convert_row(&inverted(&self.to_convert), target.table(), target.data())
    }

    /// Query on the join table, filtered by either side when given.
    pub fn query_join(&self, source: Option<&Entity>, target: Option<&Entity>) -> Result<Query> {
        let mut query = self.join.query();
        if let Some(source) = source {
            query = query.condition(self.join_keys(source)?);
        }
        if let Some(target) = target {
            query = query.condition(self.join_keys_of_target(target)?);
        }
        Ok(query)
    }

    pub(crate) fn join_query_keys(&self, keys: &[Row]) -> Query {
        self.join.query().condition(Condition::any_of_keys(keys))
    }

    pub(crate) fn target_query_keys(&self, keys: &[Row]) -> Query {
        self.target
            .query()
            .condition(self.condition.clone())
            .condition(Condition::any_of_keys(keys))
    }

    /// Join keys of `entities`, deduplicated, with the identity fixing
    /// their column order.
    pub(crate) fn distinct_join_keys(&self, entities: &[Entity]) -> Result<(Option<Identity>, Vec<Row>)> {
        let Some(first) = entities.first() else {
            return Ok((None, Vec::new()));
        };
        let identity = Identity::of(&self.join_keys(first)?);
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(entities.len());
        for entity in entities {
            let converted = identity.project(entity.table(), &self.join_keys(entity)?)?;
            if seen.insert(identity.flatten(entity.table(), &converted)?) {
                keys.push(converted);
            }
        }
        Ok((Some(identity), keys))
    }

    /// Target keys of `rows`, deduplicated.
    pub(crate) fn distinct_target_keys(&self, rows: &[Row]) -> Result<(Option<Identity>, Vec<Row>)> {
        let Some(first) = rows.first() else {
            return Ok((None, Vec::new()));
        };
        let identity = Identity::of(&self.target_keys(first)?);
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let converted = identity.project(self.join.table(), &self.target_keys(row)?)?;
            if seen.insert(identity.flatten(self.join.table(), &converted)?) {
                keys.push(converted);
            }
        }
        Ok((Some(identity), keys))
    }

    fn bound_sources(&self, action: &str) -> Result<&[Entity]> {
        if self.entities.is_empty() {
            return Err(TideError::IllegalState(format!(
                "cannot {action} join relation {} without a bound source entity",
                self.label()
            )));
        }
        Ok(&self.entities)
    }

    /// Delete every join row of the bound sources; returns the number removed.
    ///
    /// # Errors
    ///
    /// `IllegalState` when no source entity is bound.
    pub fn clear(&mut self) -> Result<u64> {
        let mut removed = 0;
        for source in self.bound_sources("clear")? {
            removed += self.join.query().delete(&self.join_keys(source)?)?;
        }
        log::debug!("cleared {removed} join row(s) of {}", self.label());
        Ok(removed)
    }
}

fn convert_row(convert: &ColumnMap, table: &str, data: &Row) -> Result<Row> {
    convert
        .iter()
        .map(|(from, to)| {
            data.get(from)
                .map(|value| (to.clone(), value.clone()))
                .ok_or_else(|| TideError::missing_key(table, from))
        })
        .collect()
}

impl RelationTrait for JoinRelation {
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

    /// Two hops: join rows of the bound sources (every join row when none
    /// is bound), then the targets they point at. An empty first hop gives a
    /// target query matching nothing.
    fn query(&self) -> Result<Query> {
        let join_query = if self.entities.is_empty() {
            self.join.query()
        } else {
            let (_, keys) = self.distinct_join_keys(&self.entities)?;
            self.join_query_keys(&keys)
        };
        let rows: Vec<Row> = join_query.select(&Row::new())?.collect();
        let (_, keys) = self.distinct_target_keys(&rows)?;
        Ok(self.target_query_keys(&keys))
    }

    /// Insert a join row linking the first bound source to `target`.
    fn relate(&mut self, target: &mut Entity) -> Result<()> {
        let source = &self.bound_sources("relate")?[0];
        let mut row = self.join_keys(source)?;
        row.extend(self.join_keys_of_target(target)?);
        self.join.query().insert(&row)?;
        Ok(())
    }

    /// Delete the join rows linking the bound sources to `target`.
    fn delete(&mut self, target: &Entity) -> Result<bool> {
        let target_side = self.join_keys_of_target(target)?;
        let mut removed = 0;
        for source in self.bound_sources("delete from")? {
            let mut keys = self.join_keys(source)?;
            keys.extend(target_side.clone());
            removed += self.join.query().delete(&keys)?;
        }
        Ok(removed > 0)
    }
}
