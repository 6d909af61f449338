//! Per-accessor tunables (SPEC_FULL §4.10): plain structs with `Default` impls, not a
//! config-file loader — the schema descriptor (`Relation`) is externally supplied and its own
//! acquisition is out of scope, so there is nothing else here to source from a file.

/// Tunables for [`crate::nosql::NoSqlAccess`].
#[derive(Debug, Clone, Copy)]
pub struct NoSqlConfig {
    /// Minimum age (ms) before an apparently-stale index row may be fossil-collected on read.
    /// Default 300_000 (5 minutes), per spec §4.6/GLOSSARY.
    pub max_fossil_age_ms: u64,
    /// Capacity of the per-accessor LRU of recently read rows (spec §4.5). Default 64.
    pub cache_capacity: usize,
}

impl Default for NoSqlConfig {
    fn default() -> Self { NoSqlConfig { max_fossil_age_ms: 300_000, cache_capacity: 64 } }
}
