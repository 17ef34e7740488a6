//! Batched relation loading.
//!
//! Resolving a relation entity by entity costs one query per source. The
//! collectors here resolve it for a whole batch at once: [`Related`] issues a
//! single target query OR-ing the converted keys of every source, [`Joined`]
//! issues one join-table query and one target query. Results are indexed by
//! flattened key (see [`Identity`]) and looked up per source afterwards.
//!
//! An empty batch issues no query at all, and a lookup that finds nothing
//! yields an empty vector, never an error.

use super::{Identity, JoinRelation, Relation, RelationTrait};
use crate::entity::Entity;
use crate::metrics::batch_loaded;
use crate::value::Row;
use crate::Result;
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Batch-resolved simple relation
#[derive(Debug, Clone)]
pub struct Related {
    relation: Relation,
    identity: Option<Identity>,
    index: HashMap<String, Vec<Entity>>,
}

impl Related {
    /// Resolve `relation` for every entity in `sources` with one query.
    ///
    /// # Errors
    ///
    /// `MissingKey` when a source or a found row lacks a key column, or the
    /// executor's error when the query fails. A failure fails the whole
    /// batch.
    pub fn load(relation: &Relation, sources: &[Entity]) -> Result<Self> {
        let label = relation.label();
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::batch_load_span(&label, sources.len()).entered();

        let relation = relation.with_entities_cleared();
        let (identity, keys) = relation.distinct_target_keys(sources)?;
        let mut index: HashMap<String, Vec<Entity>> = HashMap::new();
        if let Some(identity) = &identity {
            let found = relation.query_keys(&keys).find(&Row::new())?;
            batch_loaded(&label, sources.len(), found.len());
            let table = relation.target().table().to_string();
            for entity in found {
                let key = identity.flatten(&table, entity.data())?;
                index.entry(key).or_default().push(entity);
            }
        }
        Ok(Self {
            relation,
            identity,
            index,
        })
    }

    /// Related entities of `source`; empty when none were found.
    pub fn related_for(&self, source: &Entity) -> Result<Vec<Entity>> {
        let Some(identity) = &self.identity else {
            return Ok(Vec::new());
        };
        let keys = self.relation.target_keys(source)?;
        let key = identity.flatten(source.table(), &keys)?;
        Ok(self.index.get(&key).cloned().unwrap_or_default())
    }

    /// Number of distinct keys with at least one related entity
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Batch-resolved join relation
#[derive(Debug, Clone)]
pub struct Joined {
    relation: JoinRelation,
    join_identity: Option<Identity>,
    target_identity: Option<Identity>,
    join_index: HashMap<String, Vec<Row>>,
    target_index: HashMap<String, Vec<Entity>>,
}

impl Joined {
    /// Resolve `relation` for every entity in `sources` with at most two
    /// queries. The target query is skipped when no source has a join row.
    pub fn load(relation: &JoinRelation, sources: &[Entity]) -> Result<Self> {
        let label = relation.label();
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::batch_load_span(&label, sources.len()).entered();

        let relation = relation.with_entities_cleared();
        let join_table = relation.join().table().to_string();
        let target_table = relation.target().table().to_string();

        let (join_identity, join_keys) = relation.distinct_join_keys(sources)?;
        let mut join_index: HashMap<String, Vec<Row>> = HashMap::new();
        let mut join_rows = Vec::new();
        if let Some(identity) = &join_identity {
            join_rows = relation
                .join_query_keys(&join_keys)
                .select(&Row::new())?
                .collect();
            for row in &join_rows {
                let key = identity.flatten(&join_table, row)?;
                join_index.entry(key).or_default().push(row.clone());
            }
        }

        let (target_identity, target_keys) = relation.distinct_target_keys(&join_rows)?;
        let mut target_index: HashMap<String, Vec<Entity>> = HashMap::new();
        let mut found = 0;
        if let Some(identity) = &target_identity {
            let targets = relation.target_query_keys(&target_keys).find(&Row::new())?;
            found = targets.len();
            for entity in targets {
                let key = identity.flatten(&target_table, entity.data())?;
                target_index.entry(key).or_default().push(entity);
            }
        }
        if join_identity.is_some() {
            batch_loaded(&label, sources.len(), found);
        }

        Ok(Self {
            relation,
            join_identity,
            target_identity,
            join_index,
            target_index,
        })
    }

    /// Targets of `source`, in join-row order; a target reachable through
    /// several join rows appears once per row.
    pub fn related_for(&self, source: &Entity) -> Result<Vec<Entity>> {
        let (Some(join_identity), Some(target_identity)) =
            (&self.join_identity, &self.target_identity)
        else {
            return Ok(Vec::new());
        };
        let join_key = join_identity.flatten(source.table(), &self.relation.join_keys(source)?)?;
        let Some(rows) = self.join_index.get(&join_key) else {
            return Ok(Vec::new());
        };
        let join_table = self.relation.join().table();
        let mut related = Vec::new();
        for row in rows {
            let key = target_identity.flatten(join_table, &self.relation.target_keys(row)?)?;
            if let Some(targets) = self.target_index.get(&key) {
                related.extend(targets.iter().cloned());
            }
        }
        Ok(related)
    }

    /// Join rows found for the whole batch
    pub fn join_rows(&self) -> usize {
        self.join_index.values().map(Vec::len).sum()
    }
}

/// Result of [`AnyRelation::collect`](super::AnyRelation::collect)
#[derive(Debug, Clone)]
pub enum Collected {
    Related(Related),
    Joined(Joined),
}

impl Collected {
    pub fn related_for(&self, source: &Entity) -> Result<Vec<Entity>> {
        match self {
            Collected::Related(related) => related.related_for(source),
            Collected::Joined(joined) => joined.related_for(source),
        }
    }
}
