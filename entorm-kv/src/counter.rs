//! [`CounterShard`]: monotone 64-bit id generator built on [`KvStore::atomic_update`] (spec §4.7).

use entorm_core::codec::{self, FieldSchema};
use entorm_core::{Error, IndexKeyBuilder, Result, ScalarKind, Value};
use tracing::trace;

use crate::store::KvStore;

const FIELD_CURRENT: u32 = 1;
const FIELD_MAX: u32 = 2;

fn schema() -> Vec<FieldSchema> { vec![FieldSchema::scalar(FIELD_CURRENT, ScalarKind::I64), FieldSchema::scalar(FIELD_MAX, ScalarKind::I64)] }

fn decode(bytes: &[u8]) -> Result<(i64, i64)> {
    let fields = codec::decode(bytes, &schema())?;
    let current = match fields.iter().find(|(id, _)| *id == FIELD_CURRENT).map(|(_, v)| v) {
        Some(Value::I64(i)) => *i,
        _ => return Err(Error::Runtime("counter row missing 'current'".to_string())),
    };
    let max = match fields.iter().find(|(id, _)| *id == FIELD_MAX).map(|(_, v)| v) {
        Some(Value::I64(i)) => *i,
        _ => return Err(Error::Runtime("counter row missing 'max'".to_string())),
    };
    Ok((current, max))
}

fn encode(current: i64, max: i64) -> Vec<u8> { codec::encode(&[(FIELD_CURRENT, Value::I64(current)), (FIELD_MAX, Value::I64(max))]) }

/// A single-shard monotone counter stored under key `.sequence.<name>`. The scheme generalizes
/// to sharded counters (multiple keys, random shard per request, replenished from a master
/// shard — spec §4.7's "Open questions" note that generalization is unimplemented here); only
/// the single-shard case is supported.
pub struct CounterShard<'a, S: KvStore> {
    store: &'a S,
    name: String,
}

impl<'a, S: KvStore> CounterShard<'a, S> {
    pub fn new(store: &'a S, name: impl Into<String>) -> Self { CounterShard { store, name: name.into() } }

    fn key(&self) -> Vec<u8> {
        let mut b = IndexKeyBuilder::new();
        b.literal(b".sequence.");
        b.add_str(&self.name);
        b.into_bytes()
    }

    /// Returns the next id and increments the stored counter. Fails with
    /// `Counter '<name>' out of values` once `current == max`.
    pub fn next(&self) -> Result<i64> {
        let mut issued = None;
        let name = self.name.clone();
        self.store.atomic_update(&self.key(), &mut |old| {
            let (current, max) = match &old {
                Some(bytes) => decode(bytes)?,
                None => (1, i64::MAX),
            };
            if current == max {
                return Err(Error::counter_out_of_values(&name));
            }
            issued = Some(current);
            Ok(Some(encode(current + 1, max)))
        })?;
        let value = issued.expect("atomic_update's closure always runs and sets `issued` on success");
        trace!(counter = %self.name, value, "allocated sequence value");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UpdateFn;
    use std::sync::Mutex;

    struct FakeStore {
        row: Mutex<Option<Vec<u8>>>,
    }

    impl KvStore for FakeStore {
        fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.row.lock().unwrap().clone()) }
        fn scan(&self, _from: &[u8], _to: &[u8], _limit: u64, _preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> { Ok(Vec::new()) }
        fn insert(&self, _key: &[u8], value: &[u8]) -> Result<()> {
            *self.row.lock().unwrap() = Some(value.to_vec());
            Ok(())
        }
        fn upsert(&self, _key: &[u8], value: &[u8]) -> Result<()> {
            *self.row.lock().unwrap() = Some(value.to_vec());
            Ok(())
        }
        fn delete(&self, _key: &[u8]) -> Result<()> {
            *self.row.lock().unwrap() = None;
            Ok(())
        }
        fn atomic_update(&self, _key: &[u8], f: &mut UpdateFn) -> Result<Option<Vec<u8>>> {
            let mut row = self.row.lock().unwrap();
            let next = f(row.clone())?;
            *row = next.clone();
            Ok(next)
        }
        fn flush(&self) -> Result<()> { Ok(()) }
    }

    #[test]
    fn issues_strictly_increasing_values_with_no_gaps() {
        let store = FakeStore { row: Mutex::new(None) };
        let shard = CounterShard::new(&store, "orders");
        let values: Vec<i64> = (0..5).map(|_| shard.next().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn fails_once_exhausted() {
        let store = FakeStore { row: Mutex::new(Some(encode(i64::MAX, i64::MAX))) };
        let shard = CounterShard::new(&store, "orders");
        let err = shard.next().unwrap_err();
        assert!(err.to_string().contains("out of values"));
    }
}
