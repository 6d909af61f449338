//! `NoSqlAccess` exercised over the file-backed store, crossing a simulated process restart
//! (spec §8 invariant 5 plus durability across reopen).

use entorm_core::Value;
use entorm_kv::{NoSqlAccess, NoSqlConfig};
use entorm_kv_file::FileKvStore;
use entorm_schema::{Column, RelationBuilder, ScalarKind};
use tempfile::tempdir;

fn person_relation() -> entorm_schema::Relation {
    RelationBuilder::new("Person", 1, 1)
        .column(Column::scalar(1, "name", ScalarKind::String))
        .column(Column::scalar(2, "age", ScalarKind::I64))
        .column(Column::scalar(3, "registered", ScalarKind::Bool))
        .secondary_key("registered_by_name", 3)
        .query("registered_by_name", "WHERE registered = true ORDER BY name")
        .build()
        .unwrap()
}

fn person(name: &str, age: i64, registered: bool) -> Vec<(u32, Value)> {
    vec![(1, Value::String(name.to_string())), (2, Value::I64(age)), (3, Value::Bool(registered))]
}

#[test]
fn index_and_data_rows_survive_reopen() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("people");
    let relation = person_relation();

    {
        let store = FileKvStore::open(&prefix).unwrap();
        let access = NoSqlAccess::new(relation.clone(), store, NoSqlConfig::default()).unwrap();
        access.insert(&person("Alice", 30, true)).unwrap();
        access.insert(&person("Bob", 18, false)).unwrap();
    }

    let store = FileKvStore::open(&prefix).unwrap();
    let access = NoSqlAccess::new(relation, store, NoSqlConfig::default()).unwrap();

    assert_eq!(access.get_by_pk(&[Value::String("Alice".into())]).unwrap(), Some(person("Alice", 30, true)));
    let rows = access.query("registered_by_name", &[]).unwrap();
    assert_eq!(rows, vec![person("Alice", 30, true)]);
}
