//! The SqlDialect contract (spec §6): a flat record of capability flags plus function pointers
//! for the two non-trivial, dialect-specific operations, replacing the inheritance hierarchy the
//! source used to special-case vendor quirks (spec §9's "dynamic dispatch on dialect quirks →
//! capability struct"). `SqlAccess` branches on the flags; it never matches on a dialect type.

use std::fmt;

use entorm_core::Value;
use futures_util::future::BoxFuture;

/// The DML operation a [`SqlDialect::convert_error`] call is reporting on, so a single
/// `convertError` implementation can distinguish e.g. a unique-violation on `insert` from the
/// same SQLSTATE surfacing on `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    Insert,
    Update,
    Delete,
    Select,
}

/// What `execute_batch` reports back, shaped by which capability flag led `SqlAccess` to call it.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// `canDetermineTotalBatchUpdateCount`: the sum of rows affected across every row in the
    /// batch.
    Total(u64),
    /// `canDetermineIndividualBatchUpdateCounts`: `Some(counts)` where `counts[i] == 1` iff row
    /// `i` was affected; `None` means the dialect could not determine per-row counts at all
    /// (the JDBC `counts == null` case), which the engine treats as "every row missing".
    Individual(Option<Vec<i64>>),
}

/// A dialect-level failure, wrapping whatever error type the underlying driver produced. Kept
/// deliberately opaque here — dialect modules (e.g. [`crate::postgres`]) convert their own driver
/// error into this at the point they return it, the way `convert_error` later converts it again
/// into the domain taxonomy.
pub struct SqlRawError(pub Box<dyn std::error::Error + Send + Sync>);

impl fmt::Debug for SqlRawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&self.0, f) }
}

impl fmt::Display for SqlRawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&self.0, f) }
}

impl std::error::Error for SqlRawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(self.0.as_ref()) }
}

/// Executes `sql` once per row in `rows`, binding that row's column values as positional
/// parameters, and reports back whichever [`BatchOutcome`] shape matches the dialect's capability
/// flags. Implementations decide internally whether that means one round-trip per row or a
/// single pipelined batch — `SqlAccess` only consumes the outcome.
pub type ExecuteBatchFn<C> =
    for<'a> fn(conn: &'a C, sql: &'a str, rows: &'a [Vec<Value>]) -> BoxFuture<'a, Result<BatchOutcome, SqlRawError>>;

/// Executes `sql` once, binding `params` as positional parameters, and returns every matching
/// row as a vector of column values in the order the `SELECT` list names them. Not one of the
/// "two non-trivial operations" §9 calls out (those are specifically the batching primitives);
/// kept alongside them because `get`/`get` over an iterable need *some* row-returning execution
/// path and the spec's SqlDialect interface does not otherwise name one (see `DESIGN.md`).
pub type ExecuteSelectFn<C> = for<'a> fn(conn: &'a C, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Vec<Value>>, SqlRawError>>;

/// Converts a raw driver failure, in the context of operation `op` against relation `entity`,
/// into the domain error taxonomy (spec §7). The one place a dialect gets to turn e.g. a
/// unique-violation SQLSTATE into `Error::DuplicateKey`.
pub type ConvertErrorFn = fn(op: SqlOp, entity: &str, err: SqlRawError) -> entorm_core::Error;

/// Builds the `NEXTVAL`-equivalent SQL text for sequence `name` in this dialect's syntax.
pub type NextSequenceSqlFn = fn(name: &str) -> String;

/// A dialect: capability flags plus the function pointers `SqlAccess` calls through. Generic over
/// `C`, the connection/pool handle the function pointers receive — production code plugs in
/// `bb8::Pool<PostgresConnectionManager<NoTls>>` (see [`crate::postgres`]); tests plug in an
/// in-process fake with no network or process dependency at all (spec §8.1: no `testcontainers`
/// here).
pub struct SqlDialect<C> {
    pub can_determine_total_batch_update_count: bool,
    pub can_determine_individual_batch_update_counts: bool,
    pub execute_batch: ExecuteBatchFn<C>,
    pub execute_select: ExecuteSelectFn<C>,
    pub convert_error: ConvertErrorFn,
    pub next_sequence_sql: NextSequenceSqlFn,
}
