//! Async adaptor over a blocking [`KvStore`], the way the teacher's `storage/sled` crate wraps
//! blocking `sled` calls in `tokio::task::spawn_blocking` for use from async callers (SPEC_FULL
//! §5) without changing the single-mutex blocking semantics underneath.

use std::sync::Arc;

use async_trait::async_trait;
use entorm_core::{Error, Result};

use crate::store::KvStore;

#[async_trait]
pub trait AsyncKvStore: Send + Sync {
    async fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>>;
    async fn scan(&self, from: Vec<u8>, to: Vec<u8>, limit: u64, preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    async fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    async fn upsert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: Vec<u8>) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Runtime(format!("blocking KvStore task panicked: {e}")))?
}

#[async_trait]
impl<S: KvStore + 'static> AsyncKvStore for Arc<S> {
    async fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let store = self.clone();
        run_blocking(move || store.get(&key)).await
    }

    async fn scan(&self, from: Vec<u8>, to: Vec<u8>, limit: u64, preserve_order: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let store = self.clone();
        run_blocking(move || store.scan(&from, &to, limit, preserve_order)).await
    }

    async fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.insert(&key, &value)).await
    }

    async fn upsert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.upsert(&key, &value)).await
    }

    async fn delete(&self, key: Vec<u8>) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.delete(&key)).await
    }

    async fn flush(&self) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.flush()).await
    }
}
