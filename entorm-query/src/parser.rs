//! Turns query text into [`crate::ast::Query`] via the `pest` grammar in `query.pest`.

use pest::iterators::Pair;
use pest::Parser;

use crate::ast::{Comparison, CompareOp, Literal, LimitSpec, OrderByItem, Query, Rhs};
use crate::grammar::{QueryParser, Rule};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unexpected rule in parse tree: {0:?}")]
    UnexpectedRule(Rule),
}

pub fn parse_query(text: &str) -> Result<Query, ParseError> {
    let mut pairs = QueryParser::parse(Rule::Selection, text).map_err(|e| ParseError::Syntax(e.to_string()))?;
    let selection = pairs.next().expect("Selection rule always produced on success");

    let mut where_clause = Vec::new();
    let mut order_by = Vec::new();
    let mut limit = LimitSpec::None;

    for pair in selection.into_inner() {
        match pair.as_rule() {
            Rule::WhereClause => where_clause = parse_where_clause(pair)?,
            Rule::OrderByClause => order_by = parse_order_by_clause(pair)?,
            Rule::LimitClause => limit = parse_limit_clause(pair)?,
            Rule::EOI => {}
            other => return Err(ParseError::UnexpectedRule(other)),
        }
    }

    Ok(Query { where_clause, order_by, limit })
}

fn parse_where_clause(pair: Pair<Rule>) -> Result<Vec<Comparison>, ParseError> {
    pair.into_inner().map(parse_comparison).collect()
}

fn parse_comparison(pair: Pair<Rule>) -> Result<Comparison, ParseError> {
    let mut inner = pair.into_inner();
    let column = inner.next().expect("Comparison always has an Identifier").as_str().to_string();
    let op = parse_operator(inner.next().expect("Comparison always has an Operator"))?;
    let rhs = parse_rhs(inner.next().expect("Comparison always has an Rhs"))?;
    Ok(Comparison { column, op, rhs })
}

fn parse_operator(pair: Pair<Rule>) -> Result<CompareOp, ParseError> {
    match pair.as_str() {
        "=" => Ok(CompareOp::Eq),
        "<" => Ok(CompareOp::Lt),
        "<=" => Ok(CompareOp::Le),
        ">" => Ok(CompareOp::Gt),
        ">=" => Ok(CompareOp::Ge),
        other => Err(ParseError::Syntax(format!("unknown operator '{other}'"))),
    }
}

fn parse_rhs(pair: Pair<Rule>) -> Result<Rhs, ParseError> {
    let inner = pair.into_inner().next().expect("Rhs always wraps a Placeholder or Literal");
    match inner.as_rule() {
        Rule::Placeholder => Ok(Rhs::Placeholder),
        Rule::Literal => Ok(Rhs::Literal(parse_literal(inner)?)),
        other => Err(ParseError::UnexpectedRule(other)),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let inner = pair.into_inner().next().expect("Literal always wraps exactly one alternative");
    match inner.as_rule() {
        Rule::Boolean => Ok(Literal::Bool(inner.as_str().eq_ignore_ascii_case("true"))),
        Rule::Integer => inner
            .as_str()
            .parse::<i64>()
            .map(Literal::Int)
            .map_err(|e| ParseError::Syntax(format!("invalid integer literal: {e}"))),
        Rule::Float => inner
            .as_str()
            .parse::<f64>()
            .map(Literal::Float)
            .map_err(|e| ParseError::Syntax(format!("invalid float literal: {e}"))),
        Rule::String => {
            let raw = inner.into_inner().next().expect("String always wraps StringInner").as_str();
            Ok(Literal::String(raw.to_string()))
        }
        other => Err(ParseError::UnexpectedRule(other)),
    }
}

fn parse_order_by_clause(pair: Pair<Rule>) -> Result<Vec<OrderByItem>, ParseError> {
    pair.into_inner().map(parse_order_by_item).collect()
}

fn parse_order_by_item(pair: Pair<Rule>) -> Result<OrderByItem, ParseError> {
    let mut inner = pair.into_inner();
    let column = inner.next().expect("OrderByItem always has an Identifier").as_str().to_string();
    let descending = match inner.next() {
        Some(direction) => direction.as_str().eq_ignore_ascii_case("desc"),
        None => false,
    };
    Ok(OrderByItem { column, descending })
}

fn parse_limit_clause(pair: Pair<Rule>) -> Result<LimitSpec, ParseError> {
    let value = pair.into_inner().next().expect("LimitClause always has a LimitValue");
    let inner = value.into_inner().next().expect("LimitValue always wraps a Placeholder or Integer");
    match inner.as_rule() {
        Rule::Placeholder => Ok(LimitSpec::Placeholder),
        Rule::Integer => inner
            .as_str()
            .parse::<u64>()
            .map(LimitSpec::Static)
            .map_err(|e| ParseError::Syntax(format!("invalid limit literal: {e}"))),
        other => Err(ParseError::UnexpectedRule(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_query_as_full_scan() {
        let q = parse_query("").unwrap();
        assert!(q.where_clause.is_empty());
        assert!(q.order_by.is_empty());
        assert_eq!(q.limit, LimitSpec::None);
    }

    #[test]
    fn parses_where_and_order_by_and_limit() {
        let q = parse_query("WHERE registered = true AND age >= ? ORDER BY name DESC LIMIT ?").unwrap();
        assert_eq!(
            q.where_clause,
            vec![
                Comparison { column: "registered".into(), op: CompareOp::Eq, rhs: Rhs::Literal(Literal::Bool(true)) },
                Comparison { column: "age".into(), op: CompareOp::Ge, rhs: Rhs::Placeholder },
            ]
        );
        assert_eq!(q.order_by, vec![OrderByItem { column: "name".into(), descending: true }]);
        assert_eq!(q.limit, LimitSpec::Placeholder);
    }

    #[test]
    fn parses_string_and_numeric_literals() {
        let q = parse_query(r#"WHERE name = "Bob" AND age < -5.5"#).unwrap();
        assert_eq!(q.where_clause[0].rhs, Rhs::Literal(Literal::String("Bob".into())));
        assert_eq!(q.where_clause[1].rhs, Rhs::Literal(Literal::Float(-5.5)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_query("WHERE").is_err());
        assert!(parse_query("WHERE a == b").is_err());
    }
}
