//! [`FileKvStore`]: the reference file-backed [`KvStore`] (spec §6) — an in-memory table behind
//! the same single process-wide mutex as [`entorm_kv_memory::MemoryKvStore`], additionally
//! durable across process restarts via a `<prefix>.nosql_db` snapshot plus a `<prefix>.nosql_log`
//! append-only log, rotated into a fresh snapshot every 50 000 log records.
//!
//! Not a production storage engine (spec §6: "for test/debug; durability not guaranteed" — a
//! crash between an in-memory mutation and its log append loses that mutation). It exists so the
//! engine's KvStore contract can be exercised against a backend that actually touches disk,
//! mirroring how the teacher's `storage/sled` crate gives the same core a real embedded-database
//! backend.

mod format;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use entorm_core::{Error, Result};
use entorm_kv::{KvStore, UpdateFn};
use format::LogOp;
use tracing::{debug, trace};

/// Log records are rotated into a fresh snapshot after this many accumulate (spec §6).
const ROTATE_AT_RECORDS: u64 = 50_000;

struct Inner {
    table: BTreeMap<Vec<u8>, Vec<u8>>,
    snapshot_path: PathBuf,
    log_path: PathBuf,
    log_file: std::fs::File,
    log_record_count: u64,
}

/// A durable-ish, file-backed ordered key/value store. One instance owns one `<prefix>.nosql_db`
/// / `<prefix>.nosql_log` pair; concurrent access from multiple instances pointed at the same
/// prefix is not supported (there is no file locking — spec §6 describes the format, not a
/// multi-process protocol).
pub struct FileKvStore {
    inner: Mutex<Inner>,
}

impl FileKvStore {
    /// Opens (or creates) the database at `prefix`: `<prefix>.nosql_db` and `<prefix>.nosql_log`
    /// siblings. Replays the snapshot, then the log on top of it, so the in-memory table reflects
    /// every durable write.
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = prefix.as_ref();
        let snapshot_path = append_suffix(prefix, "nosql_db");
        let log_path = append_suffix(prefix, "nosql_log");

        let mut table = format::read_snapshot(&snapshot_path).map_err(Error::storage)?;
        let records = format::read_log_records(&log_path).map_err(Error::storage)?;
        let log_record_count = records.len() as u64;
        for record in records {
            match record {
                LogOp::Put(k, v) => {
                    table.insert(k, v);
                }
                LogOp::Delete(k) => {
                    table.remove(&k);
                }
            }
        }
        debug!(rows = table.len(), log_records = log_record_count, "opened file-backed kv store");

        let log_file = OpenOptions::new().create(true).append(true).open(&log_path).map_err(Error::storage)?;

        let store = FileKvStore { inner: Mutex::new(Inner { table, snapshot_path, log_path, log_file, log_record_count }) };
        if log_record_count >= ROTATE_AT_RECORDS {
            store.rotate()?;
        }
        Ok(store)
    }

    fn apply(&self, op: LogOp) -> Result<()> {
        let mut inner = self.inner.lock().expect("file kv mutex poisoned");
        format::append_log_record(&mut inner.log_file, &op).map_err(Error::storage)?;
        inner.log_record_count += 1;
        match &op {
            LogOp::Put(k, v) => {
                inner.table.insert(k.clone(), v.clone());
            }
            LogOp::Delete(k) => {
                inner.table.remove(k);
            }
        }
        let needs_rotation = inner.log_record_count >= ROTATE_AT_RECORDS;
        drop(inner);
        if needs_rotation {
            self.rotate()?;
        }
        Ok(())
    }

    /// Writes a fresh snapshot of the current table, then truncates the log (spec §6: "the
    /// engine writes a fresh snapshot file atomically (via rename) and truncates the log").
    fn rotate(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("file kv mutex poisoned");
        format::write_snapshot_atomic(&inner.snapshot_path, &inner.table).map_err(Error::storage)?;
        inner.log_file = OpenOptions::new().create(true).write(true).truncate(true).open(&inner.log_path).map_err(Error::storage)?;
        inner.log_record_count = 0;
        trace!(rows = inner.table.len(), "rotated log into fresh snapshot");
        Ok(())
    }
}

fn append_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    match prefix.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.inner.lock().expect("file kv mutex poisoned").table.get(key).cloned()) }

    fn scan(&self, from: &[u8], to: &[u8], limit: u64, _preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.lock().expect("file kv mutex poisoned");
        let mut rows: Vec<_> = inner.table.range(from.to_vec()..to.to_vec()).map(|(k, v)| (k.clone(), v.clone())).collect();
        if limit != 0 && (limit as usize) < rows.len() {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        {
            let inner = self.inner.lock().expect("file kv mutex poisoned");
            if inner.table.contains_key(key) {
                return Err(Error::duplicate_key(String::from_utf8_lossy(key).to_string()));
            }
        }
        self.apply(LogOp::Put(key.to_vec(), value.to_vec()))
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> { self.apply(LogOp::Put(key.to_vec(), value.to_vec())) }

    fn delete(&self, key: &[u8]) -> Result<()> { self.apply(LogOp::Delete(key.to_vec())) }

    fn atomic_update(&self, key: &[u8], f: &mut UpdateFn) -> Result<Option<Vec<u8>>> {
        // Held for the duration of the whole read-modify-write, matching the memory backend and
        // spec §5's single-mutex reference semantics: no other writer can interleave.
        let mut inner = self.inner.lock().expect("file kv mutex poisoned");
        let current = inner.table.get(key).cloned();
        let next = f(current)?;
        let op = match &next {
            Some(bytes) => LogOp::Put(key.to_vec(), bytes.clone()),
            None => LogOp::Delete(key.to_vec()),
        };
        format::append_log_record(&mut inner.log_file, &op).map_err(Error::storage)?;
        inner.log_record_count += 1;
        match &next {
            Some(bytes) => {
                inner.table.insert(key.to_vec(), bytes.clone());
            }
            None => {
                inner.table.remove(key);
            }
        }
        let needs_rotation = inner.log_record_count >= ROTATE_AT_RECORDS;
        drop(inner);
        if needs_rotation {
            self.rotate()?;
        }
        Ok(next)
    }

    fn flush(&self) -> Result<()> { self.inner.lock().expect("file kv mutex poisoned").log_file.sync_all().map_err(Error::storage) }
}
