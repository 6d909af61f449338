//! Column declarations: the leaf and composite types a [`crate::Relation`] is built from.

use entorm_core::codec::FieldSchema;
pub use entorm_core::ScalarKind;

/// Stable small integer id for a column, unique within its owning entity.
///
/// Column ids are assigned by the application when it declares its schema and never change
/// for the lifetime of the relation — they are the tag used by [`entorm_core::codec`] on the
/// wire, so renumbering a column after rows have been written would corrupt decoding.
pub type ColumnId = u32;

/// The shape of a column: a scalar, or a nested composite of further columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Scalar(ScalarKind),
    /// A nested message: itself a sequence of leaf columns, in declaration order.
    Nested(Vec<Column>),
}

/// One column declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub default: Option<ScalarDefault>,
}

/// A column's default value, used by the record codec when a field is absent from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarDefault {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl Column {
    pub fn scalar(id: ColumnId, name: impl Into<String>, kind: ScalarKind) -> Self {
        Column { id, name: name.into(), kind: ColumnKind::Scalar(kind), nullable: false, default: None }
    }

    pub fn nested(id: ColumnId, name: impl Into<String>, fields: Vec<Column>) -> Self {
        Column { id, name: name.into(), kind: ColumnKind::Nested(fields), nullable: false, default: None }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: ScalarDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Flatten this column into its ordered sequence of leaf (scalar) columns.
    ///
    /// For a scalar column this is `[self]`; for a nested column it is the
    /// depth-first concatenation of each field's own leaves. This is the "field
    /// vector" the spec's primary/secondary keys are built from.
    pub fn leaves(&self) -> Vec<&Column> {
        match &self.kind {
            ColumnKind::Scalar(_) => vec![self],
            ColumnKind::Nested(fields) => fields.iter().flat_map(|f| f.leaves()).collect(),
        }
    }

    pub fn is_nested(&self) -> bool { matches!(self.kind, ColumnKind::Nested(_)) }

    /// `Some(kind)` if this column is a scalar, `None` if it's a nested composite.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match &self.kind {
            ColumnKind::Scalar(kind) => Some(*kind),
            ColumnKind::Nested(_) => None,
        }
    }

    /// Convert to the codec-native [`FieldSchema`] `entorm_core::codec::decode` consumes.
    pub fn to_field_schema(&self) -> FieldSchema {
        match &self.kind {
            ColumnKind::Scalar(kind) => FieldSchema::scalar(self.id, *kind),
            ColumnKind::Nested(fields) => FieldSchema::nested(self.id, fields.iter().map(Column::to_field_schema).collect()),
        }
    }
}

/// Convert a column list (a relation's top-level columns, or a nested column's fields) into the
/// codec-native schema `entorm_core::codec::decode`/`decode_with_size` take.
pub fn to_field_schemas(columns: &[Column]) -> Vec<FieldSchema> { columns.iter().map(Column::to_field_schema).collect() }
