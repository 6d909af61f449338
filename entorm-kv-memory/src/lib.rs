//! [`MemoryKvStore`]: the reference in-process [`KvStore`] (spec §5/§6) — an ordered table behind
//! a single process-wide mutex, exactly the "one mutex guards the ordered table" reference
//! implementation the spec describes for in-memory and file-backed stores alike.

use std::collections::BTreeMap;
use std::sync::Mutex;

use entorm_core::{Error, Result};
use entorm_kv::{KvStore, UpdateFn};
use tracing::trace;

/// An in-process ordered key/value store. Every operation acquires the same mutex for its
/// duration (spec §5: "a single process-wide mutex guards the ordered table"), so there is no
/// finer-grained concurrency than one writer/reader at a time — adequate for tests and small
/// single-process deployments, not for anything durability-sensitive (see [`entorm_kv_file`] for
/// that, and note neither backend claims multi-key atomicity: only `atomic_update`'s single key
/// is serialized, per spec's Non-goals).
#[derive(Default)]
pub struct MemoryKvStore {
    table: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self { Self::default() }

    /// Number of live rows. Mostly useful in tests asserting on row counts after a workload.
    pub fn len(&self) -> usize { self.table.lock().expect("memory kv mutex poisoned").len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.table.lock().expect("memory kv mutex poisoned").get(key).cloned()) }

    fn scan(&self, from: &[u8], to: &[u8], limit: u64, preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table = self.table.lock().expect("memory kv mutex poisoned");
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = table.range(from.to_vec()..to.to_vec()).map(|(k, v)| (k.clone(), v.clone())).collect();
        // A BTreeMap range is already ascending; preserve_order is a no-op on this backend, but a
        // KvStore allowed to reorder an unordered request still must not rely on one here.
        let _ = preserve_order;
        if limit != 0 && (limit as usize) < out.len() {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.table.lock().expect("memory kv mutex poisoned");
        if table.contains_key(key) {
            return Err(Error::duplicate_key(String::from_utf8_lossy(key).to_string()));
        }
        table.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.lock().expect("memory kv mutex poisoned").insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.table.lock().expect("memory kv mutex poisoned").remove(key);
        Ok(())
    }

    fn atomic_update(&self, key: &[u8], f: &mut UpdateFn) -> Result<Option<Vec<u8>>> {
        let mut table = self.table.lock().expect("memory kv mutex poisoned");
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
        trace!(key = %String::from_utf8_lossy(key), deleted = next.is_none(), "atomic_update applied");
        Ok(next)
    }

    fn flush(&self) -> Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let store = MemoryKvStore::new();
        store.insert(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn duplicate_insert_fails() {
        let store = MemoryKvStore::new();
        store.insert(b"a", b"1").unwrap();
        let err = store.insert(b"a", b"2").unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn upsert_replaces_existing() {
        let store = MemoryKvStore::new();
        store.insert(b"a", b"1").unwrap();
        store.upsert(b"a", b"2").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemoryKvStore::new();
        store.delete(b"missing").unwrap();
        store.insert(b"a", b"1").unwrap();
        store.delete(b"a").unwrap();
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_respects_half_open_range_and_limit() {
        let store = MemoryKvStore::new();
        for k in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()] {
            store.insert(&k, &k).unwrap();
        }
        let rows = store.scan(b"a", b"d", 0, true).unwrap();
        assert_eq!(rows.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let limited = store.scan(b"a", b"d", 2, true).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn atomic_update_serializes_and_supports_delete() {
        let store = MemoryKvStore::new();
        store.atomic_update(b"counter", &mut |old| {
            assert!(old.is_none());
            Ok(Some(b"1".to_vec()))
        })
        .unwrap();
        assert_eq!(store.get(b"counter").unwrap(), Some(b"1".to_vec()));

        let result = store.atomic_update(b"counter", &mut |_old| Ok(None)).unwrap();
        assert_eq!(result, None);
        assert_eq!(store.get(b"counter").unwrap(), None);
    }

    #[test]
    fn atomic_update_propagates_closure_errors_without_mutating() {
        let store = MemoryKvStore::new();
        store.insert(b"a", b"1").unwrap();
        let err = store.atomic_update(b"a", &mut |_old| Err(Error::Runtime("boom".into())));
        assert!(err.is_err());
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }
}
