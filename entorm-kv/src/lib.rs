//! [`KvStore`], its async adaptor, and [`NoSqlAccess`]: the NoSQL storage layer (spec §4.5/§4.6/§6)
//! built against any ordered key/value store that implements `KvStore`.

pub mod async_store;
pub mod config;
pub mod counter;
pub mod envelope;
pub mod keys;
pub mod nosql;
pub mod store;

pub use async_store::AsyncKvStore;
pub use config::NoSqlConfig;
pub use counter::CounterShard;
pub use envelope::IndexEnvelope;
pub use nosql::{Fields, NoSqlAccess};
pub use store::{KvStore, UpdateFn};
