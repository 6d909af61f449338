//! [`NoSqlAccess`]: per-entity accessor over a [`KvStore`] (spec §4.5/§4.6) — data-row keying,
//! secondary-index maintenance, primary-key fetch, index-scan with fossil-row healing, and
//! upsert/delete/atomic-update semantics that keep index rows consistent with data rows (I1).

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

use entorm_core::codec::{self, FieldSchema};
use entorm_core::{Error, Result, Value};
use entorm_query::{CompiledQuery, IndexFunction, IndexedColumn, QueryCompiler};
use entorm_schema::column::to_field_schemas;
use entorm_schema::Relation;
use lru::LruCache;
use tracing::trace;

use crate::config::NoSqlConfig;
use crate::envelope::IndexEnvelope;
use crate::keys;
use crate::store::KvStore;

/// An entity's decoded field tree, as produced by `entorm_core::codec::decode`.
pub type Fields = Vec<(u32, Value)>;

fn now_ms() -> u64 { SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before unix epoch").as_millis() as u64 }

fn concat(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + suffix.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(suffix);
    out
}

pub struct NoSqlAccess<S: KvStore> {
    relation: Relation,
    store: S,
    indexes: Vec<IndexFunction>,
    queries: HashMap<String, CompiledQuery>,
    cache: RefCell<LruCache<Vec<u8>, Fields>>,
    config: NoSqlConfig,
}

impl<S: KvStore> NoSqlAccess<S> {
    /// Builds the per-relation write-time indexes (one per declared secondary key) and compiles
    /// every named query. A secondary key whose name matches a named query is maintained using
    /// *that query's own compiled [`IndexFunction`]* — literal WHERE predicates (e.g.
    /// `registered = true`) included — so the physical index only ever holds rows the query could
    /// actually return (spec S5: a `registered = false` row must not appear). A secondary key with
    /// no matching query is maintained unconditionally from its declared leaves. Every named query
    /// must target a declared secondary key, checked eagerly here rather than on first `query()`
    /// call (see `DESIGN.md` for why this binding is by-name rather than structural).
    pub fn new(relation: Relation, store: S, config: NoSqlConfig) -> Result<Self> {
        let mut compiled: HashMap<String, CompiledQuery> = HashMap::new();
        for decl in relation.queries() {
            let q = QueryCompiler::compile(&relation, &decl.name, &decl.text)?;
            compiled.insert(decl.name.clone(), q);
        }

        for decl in relation.queries() {
            if relation.secondary_key(&decl.name).is_none() {
                return Err(Error::SchemaError(format!(
                    "query '{}' has no matching secondary key declaration on relation '{}'",
                    decl.name,
                    relation.name()
                )));
            }
        }

        let indexes: Vec<IndexFunction> = relation
            .secondary_keys()
            .iter()
            .map(|key| match compiled.get(&key.name) {
                Some(q) => q.index_function().clone(),
                None => {
                    let columns: Vec<IndexedColumn> =
                        key.key.leaves.iter().map(|c| IndexedColumn { column_id: c.id, descending: false }).collect();
                    IndexFunction::new(key.name.clone(), columns, vec![])
                }
            })
            .collect();

        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("max(1) is never zero");
        Ok(NoSqlAccess { relation, store, indexes, queries: compiled, cache: RefCell::new(LruCache::new(capacity)), config })
    }

    pub fn relation(&self) -> &Relation { &self.relation }

    fn schema(&self) -> Vec<FieldSchema> { to_field_schemas(self.relation.columns()) }

    fn index_by_name(&self, name: &str) -> Option<&IndexFunction> { self.indexes.iter().find(|i| i.name() == name) }

    fn cache_get(&self, key: &[u8]) -> Option<Fields> { self.cache.borrow_mut().get(key).cloned() }

    fn cache_put(&self, key: Vec<u8>, fields: Fields) { self.cache.borrow_mut().put(key, fields); }

    fn cache_evict(&self, key: &[u8]) { self.cache.borrow_mut().pop(key); }

    fn fetch_old(&self, fields: &Fields) -> Result<Option<Fields>> { self.fetch_by_data_key(&keys::data_key(&self.relation, fields)) }

    fn fetch_by_data_key(&self, dkey: &[u8]) -> Result<Option<Fields>> {
        if let Some(cached) = self.cache_get(dkey) {
            return Ok(Some(cached));
        }
        match self.store.get(dkey)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes, &self.schema())?)),
            None => Ok(None),
        }
    }

    /// For every index `I` with `I.includes(new)`, write its row unless an identical one already
    /// exists under `old`'s encoding (spec §4.5 `writeNewIndexes`).
    fn write_new_indexes(&self, old: Option<&Fields>, new: &Fields) -> Result<()> {
        for index in &self.indexes {
            if !index.includes(new) {
                continue;
            }
            let new_key = keys::index_row_key(&self.relation, index, new);
            let already_present = match old {
                Some(old_fields) => index.includes(old_fields) && keys::index_row_key(&self.relation, index, old_fields) == new_key,
                None => false,
            };
            if already_present {
                continue;
            }
            let envelope =
                IndexEnvelope { timestamp_ms: now_ms(), data_key_suffix: keys::encode_pk_from_fields(&self.relation, new), data_copy: None };
            self.store.upsert(&new_key, &envelope.encode())?;
            trace!(index = index.name(), relation = self.relation.name(), "wrote index row");
        }
        Ok(())
    }

    /// For every index `I` with `I.includes(old)`, delete its row unless `new` still produces the
    /// identical key (spec §4.5 `pruneOldIndexes`).
    fn prune_old_indexes(&self, old: Option<&Fields>, new: Option<&Fields>) -> Result<()> {
        let Some(old_fields) = old else { return Ok(()) };
        for index in &self.indexes {
            if !index.includes(old_fields) {
                continue;
            }
            let old_key = keys::index_row_key(&self.relation, index, old_fields);
            let still_current = match new {
                Some(new_fields) => index.includes(new_fields) && keys::index_row_key(&self.relation, index, new_fields) == old_key,
                None => false,
            };
            if still_current {
                continue;
            }
            self.store.delete(&old_key)?;
            trace!(index = index.name(), relation = self.relation.name(), "pruned stale index row");
        }
        Ok(())
    }

    // -- write paths (spec §4.5) --

    pub fn insert(&self, fields: &Fields) -> Result<()> {
        self.write_new_indexes(None, fields)?;
        let dkey = keys::data_key(&self.relation, fields);
        self.store.insert(&dkey, &codec::encode(fields))?;
        self.cache_put(dkey, fields.clone());
        Ok(())
    }

    pub fn upsert(&self, fields: &Fields) -> Result<()> {
        let old = self.fetch_old(fields)?;
        self.write_new_indexes(old.as_ref(), fields)?;
        let dkey = keys::data_key(&self.relation, fields);
        self.store.upsert(&dkey, &codec::encode(fields))?;
        self.cache_put(dkey, fields.clone());
        self.prune_old_indexes(old.as_ref(), Some(fields))?;
        Ok(())
    }

    /// Like [`Self::upsert`], but fails with [`Error::concurrent_modification_detected`] if the
    /// prior row does not exist.
    pub fn update(&self, fields: &Fields) -> Result<()> {
        let old = self.fetch_old(fields)?;
        if old.is_none() {
            return Err(Error::concurrent_modification_detected());
        }
        self.write_new_indexes(old.as_ref(), fields)?;
        let dkey = keys::data_key(&self.relation, fields);
        self.store.upsert(&dkey, &codec::encode(fields))?;
        self.cache_put(dkey, fields.clone());
        self.prune_old_indexes(old.as_ref(), Some(fields))?;
        Ok(())
    }

    /// Deletes the row identified by `pk_values` (the primary key's leaf values, in declared leaf
    /// order). A no-op, matching `KvStore::delete`'s own idempotency, if no such row exists.
    pub fn delete(&self, pk_values: &[Value]) -> Result<()> {
        let Some(old) = self.get_by_pk(pk_values)? else { return Ok(()) };
        let dkey = keys::data_key(&self.relation, &old);
        self.store.delete(&dkey)?;
        self.prune_old_indexes(Some(&old), None)?;
        self.cache_evict(&dkey);
        Ok(())
    }

    /// Atomically mutates the row identified by `pk_values` via `f`. `f` is not called and `Ok(None)`
    /// is returned if the row does not exist. Index rows are written inside the same critical
    /// section as the data row; stale index rows are pruned afterward (spec §4.5 `atomicUpdate`).
    pub fn atomic_update(&self, pk_values: &[Value], mut f: impl FnMut(&mut Fields)) -> Result<Option<Fields>> {
        let dkey = keys::data_key_from_pk(&self.relation, &keys::encode_pk_from_values(pk_values));
        let schema = self.schema();
        let mut captured: Option<(Fields, Fields)> = None;

        let new_bytes = self.store.atomic_update(&dkey, &mut |old_bytes| {
            let Some(bytes) = old_bytes else { return Ok(None) };
            let old_fields = codec::decode(&bytes, &schema)?;
            let mut new_fields = old_fields.clone();
            f(&mut new_fields);
            self.write_new_indexes(Some(&old_fields), &new_fields)?;
            let encoded = codec::encode(&new_fields);
            captured = Some((old_fields, new_fields));
            Ok(Some(encoded))
        })?;

        if new_bytes.is_none() {
            return Ok(None);
        }
        let (old_fields, new_fields) = captured.expect("closure ran and stored its capture since new_bytes is Some");
        self.cache_put(dkey, new_fields.clone());
        self.prune_old_indexes(Some(&old_fields), Some(&new_fields))?;
        Ok(Some(new_fields))
    }

    // -- read paths (spec §4.6) --

    /// Point lookup by primary key.
    pub fn get_by_pk(&self, pk_values: &[Value]) -> Result<Option<Fields>> {
        let dkey = keys::data_key_from_pk(&self.relation, &keys::encode_pk_from_values(pk_values));
        self.fetch_by_data_key(&dkey)
    }

    /// Scans the primary-key range `[from, to)` (bare, not yet relation-prefixed).
    pub fn scan_primary_key(&self, from: &[u8], to: &[u8], limit: u64, preserve_order: bool) -> Result<Vec<Fields>> {
        let prefix = keys::primary_prefix(&self.relation);
        let rows = self.store.scan(&concat(&prefix, from), &concat(&prefix, to), limit, preserve_order)?;
        let schema = self.schema();
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let fields = codec::decode(&value, &schema)?;
            self.cache_put(key, fields.clone());
            out.push(fields);
        }
        Ok(out)
    }

    /// Runs a named, pre-compiled query (spec §4.4's `CompiledQuery::plan` bound against `params`,
    /// then scanned with fossil healing per §4.6).
    pub fn query(&self, name: &str, params: &[Value]) -> Result<Vec<Fields>> {
        let compiled = self.queries.get(name).ok_or_else(|| Error::SchemaError(format!("unknown query '{name}'")))?;
        let plan = compiled.plan(self.relation.name(), params)?;
        let index = self
            .index_by_name(compiled.index_function().name())
            .expect("NoSqlAccess::new validated every query's index exists");
        self.scan_index_range(index, plan.from_key, plan.to_key, plan.limit, plan.preserve_order)
    }

    /// The core fossil-healing scan loop (spec §4.6, steps 1-5). `from`/`to` are already fully
    /// prefixed (`relName '.' idxName DELIM ...`), as produced by `CompiledQuery::plan`.
    fn scan_index_range(&self, index: &IndexFunction, mut from: Vec<u8>, to: Vec<u8>, limit: u64, preserve_order: bool) -> Result<Vec<Fields>> {
        let schema = self.schema();
        let mut results = Vec::new();

        loop {
            let remaining = if limit == 0 { 0 } else { limit - results.len() as u64 };
            let batch = self.store.scan(&from, &to, remaining, preserve_order)?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as u64;

            let mut envelopes = Vec::with_capacity(batch.len());
            let mut need_fetch_positions = Vec::new();
            let mut need_fetch_keys = Vec::new();
            for (i, (_idx_key, value)) in batch.iter().enumerate() {
                let envelope = IndexEnvelope::decode(value)?;
                if envelope.data_copy.is_none() {
                    need_fetch_positions.push(i);
                    need_fetch_keys.push(keys::data_key_from_pk(&self.relation, &envelope.data_key_suffix));
                }
                envelopes.push(envelope);
            }
            let fetched = if need_fetch_keys.is_empty() { Vec::new() } else { self.store.fetch_rows(&need_fetch_keys)? };
            let mut fetched_by_position: HashMap<usize, Option<Vec<u8>>> = HashMap::new();
            for (pos, (_key, bytes)) in need_fetch_positions.iter().zip(fetched) {
                fetched_by_position.insert(*pos, bytes);
            }

            for (i, (idx_key, _value)) in batch.iter().enumerate() {
                let envelope = &envelopes[i];
                let obj_bytes = match &envelope.data_copy {
                    Some(bytes) => Some(bytes.clone()),
                    None => fetched_by_position.get(&i).cloned().flatten(),
                };

                let mut valid = false;
                if let Some(bytes) = &obj_bytes {
                    let fields = codec::decode(bytes, &schema)?;
                    let recomputed = keys::index_row_key(&self.relation, index, &fields);
                    if index.includes(&fields) && &recomputed == idx_key {
                        results.push(fields);
                        valid = true;
                    }
                }

                if !valid {
                    let age = now_ms().saturating_sub(envelope.timestamp_ms);
                    if age >= self.config.max_fossil_age_ms {
                        match self.store.delete(idx_key) {
                            Ok(()) => tracing::warn!(index = index.name(), age_ms = age, "fossil-collected stale index row"),
                            Err(e) => tracing::error!(error = %e, index = index.name(), "fossil collection delete failed"),
                        }
                    }
                }
            }

            if limit == 0 || batch_len < remaining {
                break;
            }
            let mut next_from = batch.last().expect("batch non-empty").0.clone();
            next_from.push(0x00);
            from = next_from;
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use entorm_schema::{Column, RelationBuilder, ScalarKind};

    use crate::store::UpdateFn;

    /// An ordered, mutex-guarded fake `KvStore`, local to this test module (same pattern as
    /// [`crate::counter`]'s `FakeStore`, extended with `scan` since index-scan tests need it).
    struct FakeStore {
        table: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    }

    impl FakeStore {
        fn new() -> Self { FakeStore { table: Mutex::new(BTreeMap::new()) } }
    }

    impl KvStore for FakeStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.table.lock().unwrap().get(key).cloned()) }

        fn scan(&self, from: &[u8], to: &[u8], limit: u64, _preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            let table = self.table.lock().unwrap();
            let mut rows: Vec<_> = table.range(from.to_vec()..to.to_vec()).map(|(k, v)| (k.clone(), v.clone())).collect();
            if limit != 0 && (limit as usize) < rows.len() {
                rows.truncate(limit as usize);
            }
            Ok(rows)
        }

        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let mut table = self.table.lock().unwrap();
            if table.contains_key(key) {
                return Err(Error::duplicate_key("test"));
            }
            table.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.table.lock().unwrap().insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn delete(&self, key: &[u8]) -> Result<()> {
            self.table.lock().unwrap().remove(key);
            Ok(())
        }

        fn atomic_update(&self, key: &[u8], f: &mut UpdateFn) -> Result<Option<Vec<u8>>> {
            let mut table = self.table.lock().unwrap();
            let current = table.get(key).cloned();
            let next = f(current)?;
            match &next {
                Some(bytes) => {
                    table.insert(key.to_vec(), bytes.clone());
                }
                None => {
                    table.remove(key);
                }
            }
            Ok(next)
        }

        fn flush(&self) -> Result<()> { Ok(()) }
    }

    fn person_relation() -> Relation {
        RelationBuilder::new("Person", 1, 1)
            .column(Column::scalar(1, "name", ScalarKind::String))
            .column(Column::scalar(2, "age", ScalarKind::I64))
            .column(Column::scalar(3, "registered", ScalarKind::Bool))
            .secondary_key("registered_by_name", 3)
            .query("registered_by_name", "WHERE registered = true ORDER BY name")
            .build()
            .unwrap()
    }

    fn person(name: &str, age: i64, registered: bool) -> Fields {
        vec![(1, Value::String(name.to_string())), (2, Value::I64(age)), (3, Value::Bool(registered))]
    }

    fn access(store: FakeStore, config: NoSqlConfig) -> NoSqlAccess<FakeStore> { NoSqlAccess::new(person_relation(), store, config).unwrap() }

    /// The real compiled shape of `registered_by_name` (`[registered, name]`, per the
    /// WHERE-first-appearance-then-ORDER-BY-column rule), for fixtures that hand-build an index
    /// row and must match what `NoSqlAccess::new` actually compiles.
    fn registered_by_name_index() -> IndexFunction {
        let relation = person_relation();
        let decl = relation.queries().iter().find(|q| q.name == "registered_by_name").unwrap();
        QueryCompiler::compile(&relation, &decl.name, &decl.text).unwrap().index_function().clone()
    }

    // Invariant 6 / S6: a fossil index row (data row gone, timestamp older than max_fossil_age)
    // is deleted by the next scanIndex that observes it, and yields no result for it.
    #[test]
    fn fossil_row_older_than_max_age_is_healed_on_scan() {
        let relation = person_relation();
        let store = FakeStore::new();
        let fields = person("Dana", 40, true);

        let index = registered_by_name_index();
        let ikey = keys::index_row_key(&relation, &index, &fields);
        let envelope =
            IndexEnvelope { timestamp_ms: 0, data_key_suffix: keys::encode_pk_from_fields(&relation, &fields), data_copy: None };
        store.upsert(&ikey, &envelope.encode()).unwrap();
        // deliberately never written: the data row this index row would have pointed at.

        let access = access(store, NoSqlConfig { max_fossil_age_ms: 300_000, cache_capacity: 64 });
        let rows = access.query("registered_by_name", &[]).unwrap();
        assert!(rows.is_empty());
        assert_eq!(access.store.get(&ikey).unwrap(), None, "fossil row must be deleted, not merely skipped");
    }

    // A fossil row younger than max_fossil_age must survive a scan that observes it (transient
    // writes in flight must not be collected prematurely).
    #[test]
    fn fossil_row_younger_than_max_age_survives_scan() {
        let relation = person_relation();
        let store = FakeStore::new();
        let fields = person("Dana", 40, true);

        let index = registered_by_name_index();
        let ikey = keys::index_row_key(&relation, &index, &fields);
        let envelope =
            IndexEnvelope { timestamp_ms: now_ms(), data_key_suffix: keys::encode_pk_from_fields(&relation, &fields), data_copy: None };
        store.upsert(&ikey, &envelope.encode()).unwrap();

        let access = access(store, NoSqlConfig { max_fossil_age_ms: 300_000, cache_capacity: 64 });
        let rows = access.query("registered_by_name", &[]).unwrap();
        assert!(rows.is_empty());
        assert!(access.store.get(&ikey).unwrap().is_some(), "young fossil row must survive the scan");
    }

    // A data_copy present in the envelope lets the scan skip the primary fetch entirely; a stale
    // data_copy (object no longer satisfies the index, or its key changed) is treated exactly
    // like a missing data row for fossil-collection purposes.
    #[test]
    fn scan_uses_inlined_data_copy_when_present() {
        let relation = person_relation();
        let store = FakeStore::new();
        let fields = person("Erin", 50, true);

        let index = registered_by_name_index();
        let ikey = keys::index_row_key(&relation, &index, &fields);
        let envelope = IndexEnvelope {
            timestamp_ms: now_ms(),
            data_key_suffix: keys::encode_pk_from_fields(&relation, &fields),
            data_copy: Some(codec::encode(&fields)),
        };
        store.upsert(&ikey, &envelope.encode()).unwrap();
        // no data row written at all; data_copy alone must be enough to satisfy the scan

        let access = access(store, NoSqlConfig::default());
        let rows = access.query("registered_by_name", &[]).unwrap();
        assert_eq!(rows, vec![fields]);
    }

    #[test]
    fn insert_upsert_update_delete_round_trip() {
        let access = access(FakeStore::new(), NoSqlConfig::default());
        access.insert(&person("Bob", 18, false)).unwrap();
        assert_eq!(access.get_by_pk(&[Value::String("Bob".into())]).unwrap(), Some(person("Bob", 18, false)));

        access.update(&person("Bob", 19, false)).unwrap();
        assert_eq!(access.get_by_pk(&[Value::String("Bob".into())]).unwrap(), Some(person("Bob", 19, false)));

        let err = access.update(&person("Nobody", 1, false)).unwrap_err();
        assert!(err.to_string().contains("Concurrent modification detected"));

        access.delete(&[Value::String("Bob".into())]).unwrap();
        assert_eq!(access.get_by_pk(&[Value::String("Bob".into())]).unwrap(), None);
    }

    #[test]
    fn atomic_update_is_noop_on_missing_row() {
        let access = access(FakeStore::new(), NoSqlConfig::default());
        let result = access.atomic_update(&[Value::String("Ghost".into())], |fields| fields[1].1 = Value::I64(99)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn atomic_update_maintains_index_consistency() {
        let access = access(FakeStore::new(), NoSqlConfig::default());
        access.insert(&person("Alice", 30, false)).unwrap();
        assert!(access.query("registered_by_name", &[]).unwrap().is_empty());

        access.atomic_update(&[Value::String("Alice".into())], |fields| fields[2].1 = Value::Bool(true)).unwrap();
        assert_eq!(access.query("registered_by_name", &[]).unwrap(), vec![person("Alice", 30, true)]);
    }
}
