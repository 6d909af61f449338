//! Entity, relation, and key descriptors consumed by the NoSQL and SQL accessors.
//!
//! This crate declares the *shape* of an application's data (columns, keys, named queries) but
//! never the storage mechanics that use that shape — those live in `entorm-kv`/`entorm-sql`,
//! keyed off the types exported here.

pub mod column;
pub mod entity;
pub mod relation;

pub use column::{Column, ColumnId, ColumnKind, ScalarDefault, ScalarKind};
pub use entity::Entity;
pub use relation::{KeyDef, Relation, RelationBuilder, RelationId, SchemaBuildError, SecondaryKeyDef};
