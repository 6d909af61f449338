//! [`QueryCompiler`]: reduces a parsed query into an [`IndexFunction`] plus a runtime plan that
//! produces `(fromKey, toKey, limit, preserve_order)` (spec §4.4).

use entorm_core::{Error, IndexKeyBuilder, Value};
use entorm_schema::{Relation, ScalarKind};

use crate::ast::{CompareOp, LimitSpec, Literal, Query, Rhs};
use crate::index_function::{IndexedColumn, IndexFunction, LiteralCheck};
use crate::parser::parse_query;

/// One WHERE-clause comparison bound to a resolved column, retained for runtime plan building.
#[derive(Debug, Clone)]
struct BoundComparison {
    column_id: u32,
    op: CompareOp,
    rhs: Rhs,
}

/// The compiled form of one named query: an [`IndexFunction`] plus everything needed to turn
/// runtime parameter values into a scan range.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    index: IndexFunction,
    where_clause: Vec<BoundComparison>,
    static_limit: Option<u64>,
    has_limit_placeholder: bool,
    preserve_order: bool,
}

/// A fully bound scan: half-open `[from_key, to_key)`, a row limit (`0` = unlimited), and whether
/// callers must preserve scan order (true whenever the query declared `ORDER BY`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub from_key: Vec<u8>,
    pub to_key: Vec<u8>,
    pub limit: u64,
    pub preserve_order: bool,
}

impl CompiledQuery {
    pub fn index_function(&self) -> &IndexFunction { &self.index }

    /// Bind `params` (the runtime values for each `?` placeholder, in textual first-appearance
    /// order across the WHERE clause and then, if present, `LIMIT ?`) into a [`ScanPlan`].
    pub fn plan(&self, relation_name: &str, params: &[Value]) -> Result<ScanPlan, Error> {
        let mut param_iter = params.iter();

        let mut prefix = IndexKeyBuilder::new();
        prefix.add_str(relation_name);
        prefix.literal(b".");
        prefix.add_str(self.index.name());
        prefix.delimiter();

        let mut from_key = prefix.clone();
        let mut to_key = prefix.clone();
        let mut to_key_needs_infinity = true;

        let last = self.where_clause.len().checked_sub(1);
        for (i, cmp) in self.where_clause.iter().enumerate() {
            let value = match &cmp.rhs {
                Rhs::Literal(_) => self.literal_value_for(cmp)?,
                Rhs::Placeholder => param_iter
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::SchemaError("not enough parameters bound for query".to_string()))?,
            };

            if Some(i) != last {
                from_key.add_value(&value, false);
                from_key.delimiter();
                to_key.add_value(&value, false);
                to_key.delimiter();
            } else {
                match cmp.op {
                    CompareOp::Eq => {
                        from_key.add_value(&value, false);
                        from_key.delimiter();
                        to_key.add_value(&value, false);
                        to_key.delimiter();
                    }
                    CompareOp::Ge => {
                        from_key.add_value(&value, false);
                    }
                    CompareOp::Gt => {
                        from_key.add_value(&value, false);
                        from_key.delimiter();
                        from_key.infinity();
                    }
                    CompareOp::Le => {
                        to_key.add_value(&value, false);
                    }
                    CompareOp::Lt => {
                        to_key.add_value(&value, false);
                        to_key.delimiter();
                        to_key.nul();
                        to_key_needs_infinity = false;
                    }
                }
            }
        }

        if to_key_needs_infinity {
            to_key.infinity();
        }

        let limit = if self.has_limit_placeholder {
            let v = param_iter.next().ok_or_else(|| Error::SchemaError("missing LIMIT parameter".to_string()))?;
            match v {
                Value::I64(n) if *n >= 0 => *n as u64,
                _ => return Err(Error::SchemaError("LIMIT parameter must be a non-negative integer".to_string())),
            }
        } else {
            self.static_limit.unwrap_or(0)
        };

        Ok(ScanPlan { from_key: from_key.into_bytes(), to_key: to_key.into_bytes(), limit, preserve_order: self.preserve_order })
    }

    fn literal_value_for(&self, cmp: &BoundComparison) -> Result<Value, Error> {
        match &cmp.rhs {
            Rhs::Literal(lit) => literal_to_value(lit),
            Rhs::Placeholder => unreachable!("literal_value_for called on a placeholder comparison"),
        }
    }
}

/// Compiles parsed queries against a bound [`Relation`] (spec component C4).
pub struct QueryCompiler;

impl QueryCompiler {
    /// Compile raw query text (as stored in `entorm_schema::QueryDecl::text`) against `relation`.
    pub fn compile(relation: &Relation, name: &str, text: &str) -> Result<CompiledQuery, Error> {
        let query = parse_query(text).map_err(|e| Error::SchemaError(format!("query '{name}': {e}")))?;
        Self::compile_parsed(relation, name, &query)
    }

    fn compile_parsed(relation: &Relation, name: &str, query: &Query) -> Result<CompiledQuery, Error> {
        validate_operator_chain(query)?;

        let mut where_clause = Vec::with_capacity(query.where_clause.len());
        let mut ordered_columns: Vec<IndexedColumn> = Vec::new();
        let mut literal_checks = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for cmp in &query.where_clause {
            let column = relation
                .column_by_name(&cmp.column)
                .ok_or_else(|| Error::SchemaError(format!("query '{name}': unknown column '{}'", cmp.column)))?;
            where_clause.push(BoundComparison { column_id: column.id, op: cmp.op, rhs: cmp.rhs.clone() });

            if seen.insert(column.id) {
                ordered_columns.push(IndexedColumn { column_id: column.id, descending: false });
            }

            if let Rhs::Literal(lit) = &cmp.rhs {
                let kind = column
                    .scalar_kind()
                    .ok_or_else(|| Error::SchemaError(format!("query '{name}': column '{}' is not a scalar", cmp.column)))?;
                check_literal_matches_column(lit, kind)?;
                let value = literal_to_value(lit)?;
                literal_checks.push(LiteralCheck { column_id: column.id, op: cmp.op, literal: value });
            }
        }

        for item in &query.order_by {
            let column = relation
                .column_by_name(&item.column)
                .ok_or_else(|| Error::SchemaError(format!("query '{name}': unknown column '{}'", item.column)))?;
            if seen.insert(column.id) {
                ordered_columns.push(IndexedColumn { column_id: column.id, descending: item.descending });
            }
        }

        let index = IndexFunction::new(name.to_string(), ordered_columns, literal_checks);

        let (static_limit, has_limit_placeholder) = match query.limit {
            LimitSpec::None => (None, false),
            LimitSpec::Static(n) => (Some(n), false),
            LimitSpec::Placeholder => (None, true),
        };

        Ok(CompiledQuery { index, where_clause, static_limit, has_limit_placeholder, preserve_order: !query.order_by.is_empty() })
    }
}

/// At most one inequality may appear in the WHERE chain, and it must be the last comparison
/// (equalities may precede it; none may follow).
fn validate_operator_chain(query: &Query) -> Result<(), Error> {
    let inequality_positions: Vec<usize> =
        query.where_clause.iter().enumerate().filter(|(_, c)| c.op.is_inequality()).map(|(i, _)| i).collect();

    match inequality_positions.as_slice() {
        [] => Ok(()),
        [only] if *only == query.where_clause.len() - 1 => Ok(()),
        [only] => Err(Error::SchemaError(format!(
            "inequality at position {only} must be the last WHERE comparison; found {} equalities after it",
            query.where_clause.len() - 1 - only
        ))),
        _ => Err(Error::SchemaError(format!("at most one inequality operator allowed in a WHERE chain, found {}", inequality_positions.len()))),
    }
}

fn literal_to_value(lit: &Literal) -> Result<Value, Error> {
    Ok(match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::I64(*i),
        Literal::Float(f) => Value::F64(*f),
        Literal::String(s) => Value::String(s.clone()),
    })
}

/// Validate a literal's runtime type roughly matches the column it's compared against. Used at
/// compile time so a type mismatch surfaces as a `SchemaError` rather than a silent miscompare.
pub fn check_literal_matches_column(lit: &Literal, kind: ScalarKind) -> Result<(), Error> {
    let ok = matches!(
        (lit, kind),
        (Literal::Bool(_), ScalarKind::Bool)
            | (Literal::Int(_), ScalarKind::I8 | ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64 | ScalarKind::Timestamp | ScalarKind::EnumOrdinal)
            | (Literal::Float(_), ScalarKind::F32 | ScalarKind::F64)
            | (Literal::String(_), ScalarKind::String)
    );
    if ok {
        Ok(())
    } else {
        Err(Error::SchemaError(format!("literal {lit:?} is not compatible with column kind {kind:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entorm_schema::{Column, RelationBuilder};

    fn person_relation() -> Relation {
        RelationBuilder::new("Person", 1, 1)
            .column(Column::scalar(1, "name", ScalarKind::String))
            .column(Column::scalar(2, "age", ScalarKind::I64))
            .column(Column::scalar(3, "registered", ScalarKind::Bool))
            .build()
            .unwrap()
    }

    #[test]
    fn compiles_equality_then_range_query() {
        let relation = person_relation();
        let compiled = QueryCompiler::compile(&relation, "by_name_age", "WHERE name = ? AND age >= ? ORDER BY age").unwrap();
        let plan = compiled.plan("Person", &[Value::String("hm".to_string()), Value::I64(42)]).unwrap();
        assert_eq!(plan.from_key, {
            let mut b = IndexKeyBuilder::new();
            b.add_str("Person");
            b.literal(b".");
            b.add_str("by_name_age");
            b.delimiter();
            b.add_str("hm");
            b.delimiter();
            b.add_uint(42);
            b.into_bytes()
        });
        assert!(plan.preserve_order);
    }

    #[test]
    fn rejects_two_inequalities() {
        let relation = person_relation();
        let err = QueryCompiler::compile(&relation, "bad", "WHERE age > ? AND age < ?");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_equality_after_inequality() {
        let relation = person_relation();
        let err = QueryCompiler::compile(&relation, "bad", "WHERE age > ? AND name = ?");
        assert!(err.is_err());
    }

    #[test]
    fn literal_equality_becomes_membership_check_not_a_runtime_param() {
        let relation = person_relation();
        let compiled = QueryCompiler::compile(&relation, "registered_by_name", "WHERE registered = true ORDER BY name").unwrap();
        assert!(compiled.index_function().includes(&[(1, Value::String("x".into())), (3, Value::Bool(true))]));
        assert!(!compiled.index_function().includes(&[(1, Value::String("x".into())), (3, Value::Bool(false))]));
        // no placeholder bound to `registered`, so plan() takes zero params for it
        let plan = compiled.plan("Person", &[]).unwrap();
        assert!(plan.preserve_order);
    }

    #[test]
    fn static_limit_is_used_when_no_placeholder() {
        let relation = person_relation();
        let compiled = QueryCompiler::compile(&relation, "top_ten", "WHERE age >= ? ORDER BY age LIMIT 10").unwrap();
        let plan = compiled.plan("Person", &[Value::I64(0)]).unwrap();
        assert_eq!(plan.limit, 10);
    }
}
