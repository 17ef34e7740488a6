//! Relation module for entity relationships.
//!
//! This module provides the relation descriptors and their batched loaders:
//! - has_one / has_many / belongs_to: [`Relation`], one key conversion
//! - join: [`JoinRelation`], many-to-many through a join table
//! - [`Related`] / [`Joined`]: batched collectors resolving a relation for a
//!   whole set of source entities with one query per hop
//!
//! # Architecture
//!
//! - **Def**: serializable relation specs (`RelationSpec`, `RelationKind`)
//! - **Traits**: the shared `RelationTrait` contract and `AnyRelation`
//! - **Identity**: flattened key identities used to index batch results
//! - **Eager**: the batched collectors

// Identity types
pub mod identity;
#[doc(inline)]
pub use identity::Identity;

// Relation definitions
pub mod def;
#[doc(inline)]
pub use def::{column_map, JoinSpec, RelationKind, RelationSpec, SimpleSpec};

// Core traits
pub mod traits;
#[doc(inline)]
pub use traits::{AnyRelation, RelationTrait};

pub mod join;
pub mod simple;
pub use join::JoinRelation;
pub use simple::Relation;

// Batched loading
pub mod eager;
#[doc(inline)]
pub use eager::{Collected, Joined, Related};
