//! The dynamic value model entities are materialized into for key-building and wire encoding.
//!
//! There is no generated per-entity struct in this crate (see `entorm_schema::Entity` for why);
//! instead an entity is always worked with as a column-id-tagged tree of [`Value`]s, the way the
//! teacher's sled backend materializes a `Vec<(u32, Value)>` from an entity before indexing it.

/// A leaf or composite value for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Char(char),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// The ordinal of an application enum.
    EnumOrdinal(i64),
    /// A nested composite column: its leaf fields, tagged by column id, in declaration order.
    Nested(Vec<(u32, Value)>),
    /// A repeated scalar or message column.
    Repeated(Vec<Value>),
}

/// The primitive kind a leaf [`Value`] or a schema column holds. Shared between the value model,
/// the record codec's wire-kind dispatch, and `entorm-schema::Column` so there is exactly one
/// definition of "what scalar kinds this engine knows about".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Char,
    F32,
    F64,
    String,
    Bytes,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// The ordinal of an application-defined enum; wire-compatible with `I64`.
    EnumOrdinal,
}

impl Value {
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::I8(_) => Some(ScalarKind::I8),
            Value::I16(_) => Some(ScalarKind::I16),
            Value::I32(_) => Some(ScalarKind::I32),
            Value::I64(_) => Some(ScalarKind::I64),
            Value::Char(_) => Some(ScalarKind::Char),
            Value::F32(_) => Some(ScalarKind::F32),
            Value::F64(_) => Some(ScalarKind::F64),
            Value::String(_) => Some(ScalarKind::String),
            Value::Bytes(_) => Some(ScalarKind::Bytes),
            Value::Timestamp(_) => Some(ScalarKind::Timestamp),
            Value::EnumOrdinal(_) => Some(ScalarKind::EnumOrdinal),
            Value::Nested(_) | Value::Repeated(_) => None,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }
}
