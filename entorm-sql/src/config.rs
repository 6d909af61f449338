//! SQL-side tunables (spec §4.10). Deliberately thin: connection pooling is explicitly out of
//! scope (the caller owns the pool and hands it to [`crate::SqlAccess`]), so there is nothing
//! left for this struct to carry beyond a `Default` impl to construct alongside
//! `entorm_kv::NoSqlConfig` at an accessor's construction site.
#[derive(Debug, Clone, Default)]
pub struct SqlConfig {}
