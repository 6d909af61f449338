//! [`KvStore`]: the abstract ordered key/value primitive the core consumes (spec §6).

use entorm_core::Result;

/// Update closure passed to [`KvStore::atomic_update`]. Receives the key's current bytes (`None`
/// if absent) and returns the bytes to store (`None` deletes the key), or an error to abort the
/// update without mutating storage. Called even when the key is absent — callers that want
/// "only update existing rows" semantics check `old.is_none()` themselves (see
/// [`crate::counter::CounterShard`], which initializes on a miss, versus
/// [`crate::nosql::NoSqlAccess::atomic_update`], which short-circuits on one).
pub type UpdateFn<'a> = dyn FnMut(Option<Vec<u8>>) -> Result<Option<Vec<u8>>> + 'a;

/// Abstract ordered key/value store (spec §6). Implementations must be internally thread-safe:
/// `atomic_update` must serialize concurrent updaters of the same key, and every other method may
/// be called concurrently from multiple accessors.
pub trait KvStore: Send + Sync {
    /// Point read.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Half-open `[from, to)`. `limit == 0` means unlimited. `preserve_order == false` permits the
    /// implementation to return rows in whatever order is cheapest for it.
    fn scan(&self, from: &[u8], to: &[u8], limit: u64, preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Batched multi-get, preserving `keys`' order; a missing key reports `None` rather than
    /// being omitted. The default falls back to repeated [`Self::get`] calls.
    fn fetch_rows(&self, keys: &[Vec<u8>]) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        keys.iter().map(|k| Ok((k.clone(), self.get(k)?))).collect()
    }

    /// Fails with [`entorm_core::Error::DuplicateKey`] if `key` already exists.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Create or replace.
    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Idempotent: deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Atomic read-modify-write on a single key.
    fn atomic_update(&self, key: &[u8], f: &mut UpdateFn) -> Result<Option<Vec<u8>>>;

    /// Block until prior writes are durable.
    fn flush(&self) -> Result<()>;
}
