//! [`Relation`]: the immutable per-entity-type schema descriptor the engine consumes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::column::Column;

/// Stable 32-bit id for a relation, assigned once at schema-declaration time.
pub type RelationId = u32;

/// A key reference: the (possibly nested) column it's built from, and that column's
/// flattened leaf sequence — the field vector §3 describes.
#[derive(Debug, Clone)]
pub struct KeyDef {
    pub column_id: u32,
    pub leaves: Vec<Column>,
}

impl KeyDef {
    fn from_column(column: &Column) -> Self {
        KeyDef { column_id: column.id, leaves: column.leaves().into_iter().cloned().collect() }
    }
}

/// A secondary key declaration: a name (used verbatim in every index row's key, per §3) and
/// the column it indexes.
#[derive(Debug, Clone)]
pub struct SecondaryKeyDef {
    pub name: String,
    pub key: KeyDef,
}

/// A named, uncompiled query: raw WHERE/ORDER BY/LIMIT text. Compilation (parsing +
/// `entorm-query`'s `QueryCompiler`) happens lazily against a `Relation`, so this crate does
/// not need to depend on the query grammar.
#[derive(Debug, Clone)]
pub struct QueryDecl {
    pub name: String,
    pub text: String,
}

/// Immutable metadata for one entity type. Cheap to clone (wraps an `Arc`).
#[derive(Debug, Clone)]
pub struct Relation(Arc<RelationInner>);

#[derive(Debug)]
struct RelationInner {
    name: String,
    id: RelationId,
    columns: Vec<Column>,
    primary_key: KeyDef,
    secondary_keys: Vec<SecondaryKeyDef>,
    queries: Vec<QueryDecl>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaBuildError {
    #[error("duplicate column id {0}")]
    DuplicateColumnId(u32),
    #[error("primary key references unknown column {0}")]
    UnknownPrimaryKeyColumn(u32),
    #[error("secondary key '{0}' references unknown column {1}")]
    UnknownSecondaryKeyColumn(String, u32),
    #[error("duplicate secondary key name '{0}'")]
    DuplicateSecondaryKeyName(String),
    #[error("relation must declare at least one column")]
    NoColumns,
}

/// Builds a [`Relation`]. Construction is a one-time, process-startup affair (relations are
/// immutable for the life of the process), so the builder panics-by-`Result` rather than
/// deferring validation to first use: a malformed schema is a programmer error, not a runtime
/// condition callers should be routing around.
pub struct RelationBuilder {
    name: String,
    id: RelationId,
    columns: Vec<Column>,
    primary_key_column: u32,
    secondary_keys: Vec<(String, u32)>,
    queries: Vec<QueryDecl>,
}

impl RelationBuilder {
    pub fn new(name: impl Into<String>, id: RelationId, primary_key_column: u32) -> Self {
        RelationBuilder { name: name.into(), id, columns: Vec::new(), primary_key_column, secondary_keys: Vec::new(), queries: Vec::new() }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn secondary_key(mut self, name: impl Into<String>, column_id: u32) -> Self {
        self.secondary_keys.push((name.into(), column_id));
        self
    }

    pub fn query(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.queries.push(QueryDecl { name: name.into(), text: text.into() });
        self
    }

    pub fn build(self) -> Result<Relation, SchemaBuildError> {
        if self.columns.is_empty() {
            return Err(SchemaBuildError::NoColumns);
        }
        let mut seen = HashSet::new();
        for c in &self.columns {
            if !seen.insert(c.id) {
                return Err(SchemaBuildError::DuplicateColumnId(c.id));
            }
        }

        let find = |id: u32| self.columns.iter().find(|c| c.id == id);

        let primary_key = KeyDef::from_column(find(self.primary_key_column).ok_or(SchemaBuildError::UnknownPrimaryKeyColumn(self.primary_key_column))?);

        let mut names = HashSet::new();
        let mut secondary_keys = Vec::with_capacity(self.secondary_keys.len());
        for (name, col_id) in self.secondary_keys {
            if !names.insert(name.clone()) {
                return Err(SchemaBuildError::DuplicateSecondaryKeyName(name));
            }
            let column = find(col_id).ok_or_else(|| SchemaBuildError::UnknownSecondaryKeyColumn(name.clone(), col_id))?;
            secondary_keys.push(SecondaryKeyDef { name, key: KeyDef::from_column(column) });
        }

        Ok(Relation(Arc::new(RelationInner {
            name: self.name,
            id: self.id,
            columns: self.columns,
            primary_key,
            secondary_keys,
            queries: self.queries,
        })))
    }
}

impl Relation {
    pub fn name(&self) -> &str { &self.0.name }
    pub fn id(&self) -> RelationId { self.0.id }
    pub fn columns(&self) -> &[Column] { &self.0.columns }
    pub fn column(&self, id: u32) -> Option<&Column> { self.0.columns.iter().find(|c| c.id == id) }
    pub fn column_by_name(&self, name: &str) -> Option<&Column> { self.0.columns.iter().find(|c| c.name == name) }
    pub fn primary_key(&self) -> &KeyDef { &self.0.primary_key }
    pub fn secondary_keys(&self) -> &[SecondaryKeyDef] { &self.0.secondary_keys }
    pub fn secondary_key(&self, name: &str) -> Option<&SecondaryKeyDef> { self.0.secondary_keys.iter().find(|k| k.name == name) }
    pub fn queries(&self) -> &[QueryDecl] { &self.0.queries }
    pub fn query(&self, name: &str) -> Option<&QueryDecl> { self.0.queries.iter().find(|q| q.name == name) }
}
