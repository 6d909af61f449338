//! The domain error taxonomy (spec §7): kinds, not types. Every boundary — `KvStore`,
//! `SqlDialect`, the record codec — converts its own low-level failures into one of these
//! variants, preserving the original cause via `#[source]`, the way the teacher's
//! `RetrievalError`/`StorageError` pair does for its own storage boundary.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unique-constraint violation, surfaced with the affected relation name.
    #[error("duplicate key in relation '{relation}'")]
    DuplicateKey { relation: String },

    /// An update/delete affected ≠1 rows, or `update` targeted a missing row.
    #[error("{0}")]
    Concurrency(String),

    /// I/O, network, connection, or serialization error from the KvStore or dialect.
    #[error("storage failure: {0}")]
    StorageFailure(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A query cannot be compiled, or a write path has no usable primary key.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// A programming error, e.g. reading past the end of a result set.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    pub fn duplicate_key(relation: impl Into<String>) -> Self { Error::DuplicateKey { relation: relation.into() } }

    /// The exact wording the spec mandates for `update` of a non-existent row.
    pub fn concurrent_modification_detected() -> Self { Error::Concurrency("Concurrent modification detected".to_string()) }

    pub fn counter_out_of_values(name: &str) -> Self { Error::Runtime(format!("Counter '{name}' out of values")) }

    pub fn multiple_results() -> Self { Error::Runtime("Multiple results".to_string()) }

    pub fn storage(source: impl std::error::Error + Send + Sync + 'static) -> Self { Error::StorageFailure(Box::new(source)) }
}

pub type Result<T> = std::result::Result<T, Error>;
