//! The production [`SqlDialect`]: Postgres over a `bb8`-pooled `tokio_postgres` connection,
//! grounded on the teacher's `storage/postgres` crate (its pool type, its `error_kind`/`SqlState`
//! classification idiom, its `tracing` usage). Postgres reports exact per-statement and total
//! affected-row counts for every statement it executes, so both capability flags are `true` here
//! — unlike some dialects, there is no `SUCCESS_NO_INFO` ambiguity to route around.

use bb8_postgres::tokio_postgres::types::ToSql;
use bb8_postgres::tokio_postgres::NoTls;
use bb8_postgres::PostgresConnectionManager;
use entorm_core::{Error, Value};
use futures_util::future::BoxFuture;
use tokio_postgres::error::SqlState;
use tracing::{debug, error};

use crate::dialect::{BatchOutcome, ConvertErrorFn, ExecuteBatchFn, ExecuteSelectFn, SqlDialect, SqlOp, SqlRawError};

/// The connection handle production `SqlAccess<PostgresPool>` instances hold.
pub type PostgresPool = bb8::Pool<PostgresConnectionManager<NoTls>>;

fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<bool>::None),
        Value::Bool(b) => Box::new(*b),
        Value::I8(n) => Box::new(*n as i16),
        Value::I16(n) => Box::new(*n),
        Value::I32(n) => Box::new(*n),
        Value::I64(n) => Box::new(*n),
        Value::Char(c) => Box::new(c.to_string()),
        Value::F32(n) => Box::new(*n),
        Value::F64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Timestamp(ms) => Box::new(*ms),
        Value::EnumOrdinal(n) => Box::new(*n),
        Value::Nested(_) | Value::Repeated(_) => Box::new(Option::<bool>::None), // schema-checked out in SqlAccess::new
    }
}

fn row_to_values(row: &tokio_postgres::Row) -> Vec<Value> {
    use tokio_postgres::types::Type;

    (0..row.len())
        .map(|i| {
            let column = row.columns()[i].type_();
            if *column == Type::BOOL {
                row.get::<_, Option<bool>>(i).map(Value::Bool).unwrap_or(Value::Null)
            } else if *column == Type::INT2 {
                row.get::<_, Option<i16>>(i).map(Value::I16).unwrap_or(Value::Null)
            } else if *column == Type::INT4 {
                row.get::<_, Option<i32>>(i).map(Value::I32).unwrap_or(Value::Null)
            } else if *column == Type::INT8 {
                row.get::<_, Option<i64>>(i).map(Value::I64).unwrap_or(Value::Null)
            } else if *column == Type::FLOAT4 {
                row.get::<_, Option<f32>>(i).map(Value::F32).unwrap_or(Value::Null)
            } else if *column == Type::FLOAT8 {
                row.get::<_, Option<f64>>(i).map(Value::F64).unwrap_or(Value::Null)
            } else if *column == Type::BYTEA {
                row.get::<_, Option<Vec<u8>>>(i).map(Value::Bytes).unwrap_or(Value::Null)
            } else {
                row.get::<_, Option<String>>(i).map(Value::String).unwrap_or(Value::Null)
            }
        })
        .collect()
}

fn postgres_execute_batch<'a>(pool: &'a PostgresPool, sql: &'a str, rows: &'a [Vec<Value>]) -> BoxFuture<'a, Result<BatchOutcome, SqlRawError>> {
    Box::pin(async move {
        let client = pool.get().await.map_err(|e| SqlRawError(Box::new(e)))?;
        let stmt = client.prepare(sql).await.map_err(|e| SqlRawError(Box::new(e)))?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let boxed: Vec<Box<dyn ToSql + Sync + Send>> = row.iter().map(value_to_sql).collect();
            let params: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
            let affected = client.execute(&stmt, &params).await.map_err(|e| SqlRawError(Box::new(e)))?;
            counts.push(affected as i64);
        }
        debug!(rows = rows.len(), total = counts.iter().sum::<i64>(), "postgres execute_batch");
        Ok(BatchOutcome::Individual(Some(counts)))
    })
}

fn postgres_execute_select<'a>(pool: &'a PostgresPool, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Vec<Value>>, SqlRawError>> {
    Box::pin(async move {
        let client = pool.get().await.map_err(|e| SqlRawError(Box::new(e)))?;
        let boxed: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(value_to_sql).collect();
        let bound: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = client.query(sql, &bound).await.map_err(|e| SqlRawError(Box::new(e)))?;
        Ok(rows.iter().map(row_to_values).collect())
    })
}

/// Classifies a `tokio_postgres::Error` into the domain taxonomy, the way the teacher's
/// `error_kind`/`ErrorKind` pair classifies `SqlState` for its own `StorageCollection` impl.
fn convert_error(op: SqlOp, entity: &str, err: SqlRawError) -> Error {
    let Some(pg_err) = err.0.downcast_ref::<tokio_postgres::Error>() else {
        return Error::storage(err);
    };
    match pg_err.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => Error::duplicate_key(entity.to_string()),
        Some(code) => {
            error!(relation = entity, ?op, sqlstate = code.code(), "postgres error");
            Error::storage(err)
        }
        None => Error::storage(err),
    }
}

fn next_sequence_sql(name: &str) -> String { format!("SELECT nextval('\"{name}\"')") }

pub const EXECUTE_BATCH: ExecuteBatchFn<PostgresPool> = postgres_execute_batch;
pub const EXECUTE_SELECT: ExecuteSelectFn<PostgresPool> = postgres_execute_select;
pub const CONVERT_ERROR: ConvertErrorFn = convert_error;

/// The dialect description for a genuine Postgres connection. Both capability flags are `true`:
/// `tokio_postgres::Client::execute` always reports an exact affected-row count per statement.
pub fn dialect() -> SqlDialect<PostgresPool> {
    SqlDialect {
        can_determine_total_batch_update_count: true,
        can_determine_individual_batch_update_counts: true,
        execute_batch: EXECUTE_BATCH,
        execute_select: EXECUTE_SELECT,
        convert_error: CONVERT_ERROR,
        next_sequence_sql,
    }
}
