//! [`SqlAccess`]: per-entity accessor over a SQL connection (spec §4.8) — batched vs per-row DML
//! chosen from the dialect's capability flags, optimistic-concurrency detection on update/delete,
//! attempt-update-then-insert upsert, and point/multi-key `get`.

use entorm_core::{Error, Result, Value};
use entorm_schema::Relation;
use tracing::{debug, trace, warn};

use crate::config::SqlConfig;
use crate::dialect::{BatchOutcome, SqlDialect, SqlOp};

/// An entity's field tree, tagged by column id — the same shape `entorm_kv::nosql::Fields`
/// carries on the KV side, kept as a separate alias here so this crate does not need to depend
/// on `entorm-kv` for one type.
pub type Fields = Vec<(u32, Value)>;

fn field_value(fields: &Fields, column_id: u32) -> Value { fields.iter().find(|(id, _)| *id == column_id).map(|(_, v)| v.clone()).unwrap_or(Value::Null) }

/// Per-entity accessor over a SQL connection pool/handle `C`. `C` is whatever the dialect's
/// function pointers expect: `bb8::Pool<PostgresConnectionManager<NoTls>>` in production
/// ([`crate::postgres::dialect`]), an in-process fake in tests (spec §8.1).
pub struct SqlAccess<C> {
    relation: Relation,
    conn: C,
    dialect: SqlDialect<C>,
    #[allow(dead_code)] // reserved for future tunables; see entorm_sql::config::SqlConfig
    config: SqlConfig,
    table: String,
    scalar_columns: Vec<u32>,
    pk_columns: Vec<u32>,
}

impl<C> SqlAccess<C> {
    /// Builds an accessor for `relation` over `conn`. Only top-level scalar columns are mapped
    /// to SQL columns — the spec's SQL-side scope is batching/concurrency policy, not a general
    /// nested-column-to-DDL mapping, so a relation with nested (composite) top-level columns is
    /// a schema error here even though the KV side supports them.
    pub fn new(relation: Relation, conn: C, dialect: SqlDialect<C>, config: SqlConfig) -> Result<Self> {
        let mut scalar_columns = Vec::with_capacity(relation.columns().len());
        for column in relation.columns() {
            if column.is_nested() {
                return Err(Error::SchemaError(format!("column '{}' is nested; SqlAccess only maps scalar columns", column.name)));
            }
            scalar_columns.push(column.id);
        }
        let pk_columns: Vec<u32> = relation.primary_key().leaves.iter().map(|c| c.id).collect();
        let table = relation.name().to_string();
        Ok(SqlAccess { relation, conn, dialect, config, table, scalar_columns, pk_columns })
    }

    fn column_name(&self, id: u32) -> &str { self.relation.column(id).map(|c| c.name.as_str()).unwrap_or("?") }

    fn non_pk_columns(&self) -> Vec<u32> { self.scalar_columns.iter().copied().filter(|id| !self.pk_columns.contains(id)).collect() }

    fn insert_sql(&self) -> String {
        let columns: Vec<&str> = self.scalar_columns.iter().map(|id| self.column_name(*id)).collect();
        let col_list = columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=columns.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        format!("INSERT INTO \"{}\" ({col_list}) VALUES ({placeholders})", self.table)
    }

    fn insert_values(&self, fields: &Fields) -> Vec<Value> { self.scalar_columns.iter().map(|id| field_value(fields, *id)).collect() }

    fn update_sql(&self) -> String {
        let non_pk = self.non_pk_columns();
        let set_clause = non_pk.iter().enumerate().map(|(i, id)| format!("\"{}\" = ${}", self.column_name(*id), i + 1)).collect::<Vec<_>>().join(", ");
        let where_clause =
            self.pk_columns.iter().enumerate().map(|(i, id)| format!("\"{}\" = ${}", self.column_name(*id), non_pk.len() + i + 1)).collect::<Vec<_>>().join(" AND ");
        format!("UPDATE \"{}\" SET {set_clause} WHERE {where_clause}", self.table)
    }

    fn update_values(&self, fields: &Fields) -> Vec<Value> {
        let mut values: Vec<Value> = self.non_pk_columns().iter().map(|id| field_value(fields, *id)).collect();
        values.extend(self.pk_columns.iter().map(|id| field_value(fields, *id)));
        values
    }

    fn delete_sql(&self) -> String {
        let where_clause = self.pk_columns.iter().enumerate().map(|(i, id)| format!("\"{}\" = ${}", self.column_name(*id), i + 1)).collect::<Vec<_>>().join(" AND ");
        format!("DELETE FROM \"{}\" WHERE {where_clause}", self.table)
    }

    fn select_by_pk_sql(&self) -> String {
        let col_list = self.scalar_columns.iter().map(|id| format!("\"{}\"", self.column_name(*id))).collect::<Vec<_>>().join(", ");
        let where_clause = self.pk_columns.iter().enumerate().map(|(i, id)| format!("\"{}\" = ${}", self.column_name(*id), i + 1)).collect::<Vec<_>>().join(" AND ");
        format!("SELECT {col_list} FROM \"{}\" WHERE {where_clause}", self.table)
    }

    fn select_in_sql(&self, n: usize) -> Result<String> {
        if self.pk_columns.len() != 1 {
            return Err(Error::SchemaError("get(iterable<K>) IN-clause fast path requires a single-column primary key".to_string()));
        }
        let col_list = self.scalar_columns.iter().map(|id| format!("\"{}\"", self.column_name(*id))).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=n).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
        Ok(format!("SELECT {col_list} FROM \"{}\" WHERE \"{}\" IN ({placeholders})", self.table, self.column_name(self.pk_columns[0])))
    }

    fn row_to_fields(&self, row: Vec<Value>) -> Fields { self.scalar_columns.iter().cloned().zip(row).collect() }

    async fn execute_batched(&self, op: SqlOp, sql: &str, rows: Vec<Vec<Value>>) -> Result<BatchOutcome> {
        (self.dialect.execute_batch)(&self.conn, sql, &rows).await.map_err(|e| (self.dialect.convert_error)(op, self.relation.name(), e))
    }

    /// Checks a full-batch outcome (insert/update/delete: every input row must have been
    /// affected) per spec §4.8's first bullet: "If `canDetermineTotalBatchUpdateCount`: ...
    /// compare total to input count. If mismatch, raise `ConcurrencyException`" and its else
    /// branch ("track whether every call returned 1"). Spec §4.8's closing sentence carves out
    /// one case specially: "An update returning more affected rows than input rows is a schema
    /// error (primary key missing)" — a single DML statement matching more rows than it was bound
    /// for means the WHERE clause (the primary key) isn't actually unique, which is a schema
    /// defect, not a concurrent writer; every other mismatch (fewer rows affected) is `Concurrency`.
    fn check_full_batch_outcome(&self, outcome: BatchOutcome, expected: usize) -> Result<()> {
        match outcome {
            BatchOutcome::Total(total) => {
                let total = total as usize;
                if total > expected {
                    warn!(relation = self.relation.name(), expected, total, "batch affected more rows than input; primary key is not unique");
                    return Err(Error::SchemaError(format!(
                        "relation '{}': DML affected {total} rows for {expected} input rows; primary key is not unique",
                        self.relation.name()
                    )));
                }
                if total < expected {
                    warn!(relation = self.relation.name(), expected, total, "batch affected-row total did not match input count");
                    return Err(Error::concurrent_modification_detected());
                }
            }
            BatchOutcome::Individual(counts) => {
                let counts = counts.unwrap_or_default();
                if counts.iter().any(|&n| n > 1) {
                    warn!(relation = self.relation.name(), expected, ?counts, "a single row affected more than one DML row; primary key is not unique");
                    return Err(Error::SchemaError(format!(
                        "relation '{}': a row affected more than one DML row; primary key is not unique",
                        self.relation.name()
                    )));
                }
                let all_affected = counts.len() == expected && counts.iter().all(|&n| n == 1);
                if !all_affected {
                    warn!(relation = self.relation.name(), expected, ?counts, "not every row in the batch was affected");
                    return Err(Error::concurrent_modification_detected());
                }
            }
        }
        Ok(())
    }

    /// Inserts every row in `rows`. Empty input is a no-op; a duplicate primary key is reported by
    /// `convert_error` translating the dialect's unique-violation, not by this method.
    pub async fn insert(&self, rows: &[Fields]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        trace!(relation = self.relation.name(), count = rows.len(), "sql insert");
        let sql = self.insert_sql();
        let params: Vec<Vec<Value>> = rows.iter().map(|r| self.insert_values(r)).collect();
        let outcome = self.execute_batched(SqlOp::Insert, &sql, params).await?;
        self.check_full_batch_outcome(outcome, rows.len())
    }

    /// Updates every row in `rows` by primary key. Any row that affects zero DML rows (primary
    /// key absent) raises `Concurrency` for the whole batch, per spec §4.8/§7.
    pub async fn update(&self, rows: &[Fields]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        trace!(relation = self.relation.name(), count = rows.len(), "sql update");
        let sql = self.update_sql();
        let params: Vec<Vec<Value>> = rows.iter().map(|r| self.update_values(r)).collect();
        let outcome = self.execute_batched(SqlOp::Update, &sql, params).await?;
        self.check_full_batch_outcome(outcome, rows.len())
    }

    /// Deletes rows by primary key. Delete is idempotent at the KV layer but not here: the spec's
    /// concurrency check applies uniformly to update/delete (§4.8's "For each of {insert, update,
    /// delete}: ..."), so deleting an already-absent key also raises `Concurrency`.
    pub async fn delete(&self, pks: &[Vec<Value>]) -> Result<()> {
        if pks.is_empty() {
            return Ok(());
        }
        trace!(relation = self.relation.name(), count = pks.len(), "sql delete");
        let sql = self.delete_sql();
        let outcome = self.execute_batched(SqlOp::Delete, &sql, pks.to_vec()).await?;
        self.check_full_batch_outcome(outcome, pks.len())
    }

    /// Attempt-update-then-insert (spec §4.8): every row is first tried as an update; rows that
    /// did not affect exactly one DML row are collected, in their original order, and passed to
    /// `insert`. Never double-inserts a row that updated successfully.
    pub async fn upsert(&self, rows: &[Fields]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        trace!(relation = self.relation.name(), count = rows.len(), "sql upsert");
        let sql = self.update_sql();

        let per_row_counts: Vec<i64> = if self.dialect.can_determine_individual_batch_update_counts {
            let params: Vec<Vec<Value>> = rows.iter().map(|r| self.update_values(r)).collect();
            match self.execute_batched(SqlOp::Update, &sql, params).await? {
                BatchOutcome::Individual(Some(counts)) => counts,
                // `counts == null`: the spec mandates treating this as "every row missing", not
                // guessing at SUCCESS_NO_INFO vs. failure (spec §9 open question).
                BatchOutcome::Individual(None) => Vec::new(),
                BatchOutcome::Total(_) => {
                    return Err(Error::Runtime(
                        "dialect advertised can_determine_individual_batch_update_counts but execute_batch returned a total".to_string(),
                    ));
                }
            }
        } else {
            let mut counts = Vec::with_capacity(rows.len());
            for row in rows {
                let params = vec![self.update_values(row)];
                let outcome = self.execute_batched(SqlOp::Update, &sql, params).await?;
                counts.push(match outcome {
                    BatchOutcome::Total(n) => n as i64,
                    BatchOutcome::Individual(Some(c)) => c.first().copied().unwrap_or(0),
                    BatchOutcome::Individual(None) => 0,
                });
            }
            counts
        };

        let needs_insert: Vec<Fields> =
            rows.iter().enumerate().filter(|(i, _)| per_row_counts.get(*i).copied() != Some(1)).map(|(_, r)| r.clone()).collect();

        debug!(relation = self.relation.name(), updated = rows.len() - needs_insert.len(), inserted = needs_insert.len(), "sql upsert split");
        if !needs_insert.is_empty() {
            self.insert(&needs_insert).await?;
        }
        Ok(())
    }

    /// Point lookup by primary key. Two or more matching rows is a domain error ("Multiple
    /// results"), never silently truncated to the first.
    pub async fn get(&self, pk: &[Value]) -> Result<Option<Fields>> {
        let sql = self.select_by_pk_sql();
        let rows = (self.dialect.execute_select)(&self.conn, &sql, pk).await.map_err(|e| (self.dialect.convert_error)(SqlOp::Select, self.relation.name(), e))?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(self.row_to_fields(rows.into_iter().next().expect("len checked above")))),
            _ => Err(Error::multiple_results()),
        }
    }

    /// Multi-key lookup (spec §4.8's `get(iterable<K>)`): empty input returns no rows; a single
    /// key delegates to [`Self::get`]; otherwise a single `WHERE pk IN (...)` statement is issued
    /// when the primary key is a single column, else each key is looked up individually.
    pub async fn get_many(&self, pks: &[Vec<Value>]) -> Result<Vec<Fields>> {
        match pks.len() {
            0 => Ok(Vec::new()),
            1 => Ok(self.get(&pks[0]).await?.into_iter().collect()),
            n if self.pk_columns.len() == 1 => {
                let sql = self.select_in_sql(n)?;
                let params: Vec<Value> = pks.iter().map(|pk| pk[0].clone()).collect();
                let rows =
                    (self.dialect.execute_select)(&self.conn, &sql, &params).await.map_err(|e| (self.dialect.convert_error)(SqlOp::Select, self.relation.name(), e))?;
                Ok(rows.into_iter().map(|row| self.row_to_fields(row)).collect())
            }
            _ => {
                let mut out = Vec::with_capacity(pks.len());
                for pk in pks {
                    out.extend(self.get(pk).await?);
                }
                Ok(out)
            }
        }
    }

    /// The `NEXTVAL`-equivalent statement text for sequence `name` in this accessor's dialect.
    pub fn next_sequence_sql(&self, name: &str) -> String { (self.dialect.next_sequence_sql)(name) }
}
