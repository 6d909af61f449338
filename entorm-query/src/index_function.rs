//! [`IndexFunction`]: a compiled query's membership predicate plus key encoder (spec §4.3).

use entorm_core::{IndexKeyBuilder, Value};

use crate::ast::CompareOp;

fn lookup<'a>(fields: &'a [(u32, Value)], id: u32) -> Option<&'a Value> {
    fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v)
}

/// Widens any integer-family scalar (`I8`/`I16`/`I32`/`I64`/`EnumOrdinal`/`Timestamp`) to `i128`,
/// so a column's native width can be compared against a literal that `literal_to_value` always
/// materializes as `I64` regardless of the column's declared kind.
fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::I8(n) => Some(*n as i128),
        Value::I16(n) => Some(*n as i128),
        Value::I32(n) => Some(*n as i128),
        Value::I64(n) => Some(*n as i128),
        Value::EnumOrdinal(n) => Some(*n as i128),
        Value::Timestamp(n) => Some(*n as i128),
        _ => None,
    }
}

/// Widens `F32`/`F64` to `f64`, for the same reason `as_integer` widens the integer family: a
/// literal float is always an `F64`.
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::F32(n) => Some(*n as f64),
        Value::F64(n) => Some(*n),
        _ => None,
    }
}

fn compare_value(value: &Value, op: CompareOp, literal: &Value) -> bool {
    use std::cmp::Ordering;
    let ordering = match (value, literal) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
        _ => match (as_integer(value), as_integer(literal)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => match (as_float(value), as_float(literal)) {
                (Some(a), Some(b)) => match a.partial_cmp(&b) {
                    Some(o) => o,
                    None => return false,
                },
                _ => return false,
            },
        },
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// One column in an index's encoded key, in the order `encode` emits it.
#[derive(Debug, Clone)]
pub struct IndexedColumn {
    pub column_id: u32,
    pub descending: bool,
}

/// A compile-time-fixed comparison baked into the index's declaration (e.g. `registered = true`
/// with a literal, not a placeholder) that every member object must satisfy.
#[derive(Debug, Clone)]
pub struct LiteralCheck {
    pub column_id: u32,
    pub op: CompareOp,
    pub literal: Value,
}

/// Compiled membership predicate (`includes`) plus key encoder (`encode`) for one named query.
#[derive(Debug, Clone)]
pub struct IndexFunction {
    name: String,
    columns: Vec<IndexedColumn>,
    literal_checks: Vec<LiteralCheck>,
}

impl IndexFunction {
    pub fn new(name: impl Into<String>, columns: Vec<IndexedColumn>, literal_checks: Vec<LiteralCheck>) -> Self {
        IndexFunction { name: name.into(), columns, literal_checks }
    }

    /// Stable string used as part of every index row key.
    pub fn name(&self) -> &str { &self.name }

    pub fn columns(&self) -> &[IndexedColumn] { &self.columns }

    /// `false` if any field the index encodes is null, or if a literal-equality predicate baked
    /// into the index declaration doesn't hold for `fields`.
    pub fn includes(&self, fields: &[(u32, Value)]) -> bool {
        for column in &self.columns {
            match lookup(fields, column.column_id) {
                Some(v) if !v.is_null() => {}
                _ => return false,
            }
        }
        for check in &self.literal_checks {
            match lookup(fields, check.column_id) {
                Some(v) if compare_value(v, check.op, &check.literal) => {}
                _ => return false,
            }
        }
        true
    }

    /// Append the indexed columns, in order, separated by delimiters (spec §4.1/§4.3). Calling
    /// this twice on the same `fields` yields identical bytes (spec §8 property 4).
    pub fn encode(&self, builder: &mut IndexKeyBuilder, fields: &[(u32, Value)]) {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                builder.delimiter();
            }
            match lookup(fields, column.column_id) {
                Some(v) => {
                    builder.add_value(v, column.descending);
                }
                None => {} // absent field: includes() already rejected this object if required
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(u32, Value)> {
        vec![(1, Value::String("hm".to_string())), (2, Value::I64(42)), (3, Value::Bool(true))]
    }

    #[test]
    fn includes_rejects_null_indexed_field() {
        let index = IndexFunction::new("by_name_age", vec![IndexedColumn { column_id: 1, descending: false }, IndexedColumn { column_id: 2, descending: false }], vec![]);
        let mut f = fields();
        f[1].1 = Value::Null;
        assert!(!index.includes(&f));
    }

    #[test]
    fn includes_checks_literal_predicate() {
        let index = IndexFunction::new(
            "registered_by_name",
            vec![IndexedColumn { column_id: 1, descending: false }],
            vec![LiteralCheck { column_id: 3, op: CompareOp::Eq, literal: Value::Bool(true) }],
        );
        assert!(index.includes(&fields()));
        let mut f = fields();
        f[2].1 = Value::Bool(false);
        assert!(!index.includes(&f));
    }

    // A literal is always materialized as I64 (literal_to_value), so a literal-equality predicate
    // against a narrower or differently-kinded numeric column (I8, EnumOrdinal, Timestamp, F32)
    // must still compare by value rather than by variant.
    #[test]
    fn includes_checks_literal_predicate_against_narrower_numeric_columns() {
        let index = IndexFunction::new(
            "by_status",
            vec![IndexedColumn { column_id: 1, descending: false }],
            vec![LiteralCheck { column_id: 4, op: CompareOp::Eq, literal: Value::I64(1) }],
        );
        let mut f = fields();
        f.push((4, Value::EnumOrdinal(1)));
        assert!(index.includes(&f));
        f.last_mut().unwrap().1 = Value::EnumOrdinal(2);
        assert!(!index.includes(&f));

        let mut f8 = fields();
        f8.push((4, Value::I8(1)));
        assert!(index.includes(&f8));
    }

    #[test]
    fn compare_value_widens_float_variants() {
        let index = IndexFunction::new(
            "by_score",
            vec![IndexedColumn { column_id: 1, descending: false }],
            vec![LiteralCheck { column_id: 4, op: CompareOp::Ge, literal: Value::F64(2.5) }],
        );
        let mut f = fields();
        f.push((4, Value::F32(3.0)));
        assert!(index.includes(&f));
        f.last_mut().unwrap().1 = Value::F32(2.0);
        assert!(!index.includes(&f));
    }

    #[test]
    fn encode_matches_s3_vector() {
        let index = IndexFunction::new(
            "by_name_age",
            vec![IndexedColumn { column_id: 1, descending: false }, IndexedColumn { column_id: 2, descending: false }],
            vec![],
        );
        let mut builder = IndexKeyBuilder::new();
        index.encode(&mut builder, &fields());
        assert_eq!(builder.as_bytes(), &[b'h', b'm', 0x00, 0x01, 0x01, 0x2A]);
    }

    #[test]
    fn encode_is_deterministic() {
        let index = IndexFunction::new("by_name", vec![IndexedColumn { column_id: 1, descending: false }], vec![]);
        let mut a = IndexKeyBuilder::new();
        index.encode(&mut a, &fields());
        let mut b = IndexKeyBuilder::new();
        index.encode(&mut b, &fields());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
