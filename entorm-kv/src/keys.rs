//! Data-row and index-row key construction (spec §3): `IndexKeyBuilder` assembled according to
//! the `relName DELIM pk` / `relName '.' idxName DELIM idx_fields DELIM pk` layouts.

use entorm_core::{IndexKeyBuilder, Value};
use entorm_query::IndexFunction;
use entorm_schema::Relation;

fn lookup<'a>(fields: &'a [(u32, Value)], id: u32) -> &'a Value {
    fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v).unwrap_or(&Value::Null)
}

/// Encode a relation's primary-key leaves, in declared leaf order, delimiter-separated.
pub fn encode_pk_from_fields(relation: &Relation, fields: &[(u32, Value)]) -> Vec<u8> {
    let leaves = &relation.primary_key().leaves;
    let values: Vec<Value> = leaves.iter().map(|c| lookup(fields, c.id).clone()).collect();
    encode_pk_from_values(&values)
}

/// Encode a primary key directly from its leaf values, for point lookups (`get(K)`) where the
/// caller supplies the key rather than a full field tree.
pub fn encode_pk_from_values(values: &[Value]) -> Vec<u8> {
    let mut b = IndexKeyBuilder::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            b.delimiter();
        }
        b.add_value(v, false);
    }
    b.into_bytes()
}

/// Data-row key: `encode(relation.name) DELIM encode(pk_leaves(obj))`.
pub fn data_key(relation: &Relation, fields: &[(u32, Value)]) -> Vec<u8> {
    data_key_from_pk(relation, &encode_pk_from_fields(relation, fields))
}

/// Data-row key built from an already-encoded primary-key suffix (as stored inside an index row's
/// envelope, or as produced by [`encode_pk_from_values`]).
pub fn data_key_from_pk(relation: &Relation, pk_bytes: &[u8]) -> Vec<u8> {
    let mut b = IndexKeyBuilder::new();
    b.add_str(relation.name());
    b.delimiter();
    b.literal(pk_bytes);
    b.into_bytes()
}

/// Prefix shared by `relName DELIM ...` primary-key scans.
pub fn primary_prefix(relation: &Relation) -> Vec<u8> {
    let mut b = IndexKeyBuilder::new();
    b.add_str(relation.name());
    b.delimiter();
    b.into_bytes()
}

/// Prefix shared by every row of one secondary index: `encode(relation.name) '.' encode(idxName) DELIM`.
pub fn index_prefix(relation: &Relation, index_name: &str) -> Vec<u8> {
    let mut b = IndexKeyBuilder::new();
    b.add_str(relation.name());
    b.literal(b".");
    b.add_str(index_name);
    b.delimiter();
    b.into_bytes()
}

/// Full index-row key: `prefix idx_fields DELIM pk`.
pub fn index_row_key(relation: &Relation, index: &IndexFunction, fields: &[(u32, Value)]) -> Vec<u8> {
    let mut b = IndexKeyBuilder::new();
    b.literal(&index_prefix(relation, index.name()));
    index.encode(&mut b, fields);
    b.delimiter();
    b.literal(&encode_pk_from_fields(relation, fields));
    b.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use entorm_query::IndexedColumn;
    use entorm_schema::{Column, RelationBuilder, ScalarKind};

    fn relation() -> Relation {
        RelationBuilder::new("Person", 1, 1)
            .column(Column::scalar(1, "name", ScalarKind::String))
            .column(Column::scalar(2, "age", ScalarKind::I64))
            .build()
            .unwrap()
    }

    #[test]
    fn data_key_matches_relname_delim_pk_layout() {
        let relation = relation();
        let fields = vec![(1, Value::String("Bob".into())), (2, Value::I64(18))];
        let mut expected = IndexKeyBuilder::new();
        expected.add_str("Person");
        expected.delimiter();
        expected.add_str("Bob");
        assert_eq!(data_key(&relation, &fields), expected.into_bytes());
    }

    #[test]
    fn index_row_key_matches_dotted_layout() {
        let relation = relation();
        let fields = vec![(1, Value::String("hm".into())), (2, Value::I64(42))];
        let index = IndexFunction::new(
            "by_name_age",
            vec![IndexedColumn { column_id: 1, descending: false }, IndexedColumn { column_id: 2, descending: false }],
            vec![],
        );
        let mut expected = IndexKeyBuilder::new();
        expected.add_str("Person");
        expected.literal(b".");
        expected.add_str("by_name_age");
        expected.delimiter();
        expected.add_str("hm");
        expected.delimiter();
        expected.add_uint(42);
        expected.delimiter();
        expected.add_str("hm"); // primary key is `name` in this fixture
        assert_eq!(index_row_key(&relation, &index, &fields), expected.into_bytes());
    }
}
