//! SQL rendering of query specs with `sea_query`.
//!
//! Each function turns a [`QuerySpec`](super::QuerySpec) (plus a payload where
//! needed) into a `sea_query` statement. Executors call `build` on the result
//! with the dialect they speak, so values always travel as bound parameters.

use super::{Condition, JoinClause, Order, QuerySpec};
use crate::value::{Row, Value};
use crate::TideError;
use sea_query::{
    Asterisk, DeleteStatement, Expr, ExprTrait, Iden, InsertStatement, Query as SeaQuery,
    SelectStatement, UpdateStatement,
};

/// Runtime identifier
#[derive(Debug, Clone)]
pub(crate) struct Ident(String);

impl Ident {
    pub(crate) fn new(name: &str) -> Self {
        Ident(name.to_string())
    }
}

impl Iden for Ident {
    fn unquoted(&self) -> &str {
        &self.0
    }
}

/// Column expression; `table.column` renders qualified.
fn column(name: &str) -> Expr {
    match name.split_once('.') {
        Some((table, col)) => Expr::col((Ident::new(table), Ident::new(col))),
        None => Expr::col(Ident::new(name)),
    }
}

/// Convert a condition tree into a `sea_query` condition
pub fn to_sea_condition(condition: &Condition) -> sea_query::Condition {
    match condition {
        Condition::Eq(name, value) if value.is_null() => {
            sea_query::Condition::all().add(column(name).is_null())
        }
        Condition::Eq(name, value) => {
            sea_query::Condition::all().add(column(name).eq(value.to_sea_value()))
        }
        Condition::In(_, values) if values.is_empty() => never(),
        Condition::In(name, values) => sea_query::Condition::all()
            .add(column(name).is_in(values.iter().map(|v| v.to_sea_value()))),
        Condition::All(parts) => parts
            .iter()
            .fold(sea_query::Condition::all(), |acc, part| acc.add(to_sea_condition(part))),
        Condition::Any(parts) if parts.is_empty() => never(),
        Condition::Any(parts) => parts
            .iter()
            .fold(sea_query::Condition::any(), |acc, part| acc.add(to_sea_condition(part))),
        Condition::Never => never(),
    }
}

/// Payload value; `NULL` is written inline so it never needs a typed parameter.
fn value_expr(value: &Value) -> Expr {
    if value.is_null() {
        Expr::cust("NULL")
    } else {
        Expr::val(value.to_sea_value())
    }
}

fn never() -> sea_query::Condition {
    sea_query::Condition::all().add(Expr::cust("1 = 0"))
}

fn apply_join(statement: &mut SelectStatement, base: &str, join: &JoinClause) {
    let on = join.on.iter().fold(sea_query::Condition::all(), |acc, (local, foreign)| {
        acc.add(
            Expr::col((Ident::new(base), Ident::new(local)))
                .eq(Expr::col((Ident::new(&join.table), Ident::new(foreign)))),
        )
    });
    statement.inner_join(Ident::new(&join.table), on);
}

/// `SELECT` for a spec. Joined queries select only the base table's columns.
pub fn select_statement(spec: &QuerySpec) -> SelectStatement {
    let mut statement = SeaQuery::select();
    if spec.joins.is_empty() {
        statement.column(Asterisk);
    } else {
        statement.expr(Expr::cust(format!("\"{}\".*", spec.table)));
    }
    statement.from(Ident::new(&spec.table));
    for join in &spec.joins {
        apply_join(&mut statement, &spec.table, join);
    }
    if !spec.condition.is_always() {
        statement.cond_where(to_sea_condition(&spec.condition));
    }
    for (name, order) in &spec.order {
        let order = match order {
            Order::Asc => sea_query::Order::Asc,
            Order::Desc => sea_query::Order::Desc,
        };
        match name.split_once('.') {
            Some((table, col)) => {
                statement.order_by((Ident::new(table), Ident::new(col)), order);
            }
            None => {
                statement.order_by(Ident::new(name), order);
            }
        }
    }
    if let Some(limit) = spec.limit {
        statement.limit(limit);
    }
    statement
}

/// `SELECT COUNT(*)` for a spec
pub fn count_statement(spec: &QuerySpec) -> SelectStatement {
    let mut statement = SeaQuery::select();
    statement
        .expr(Expr::cust("COUNT(*)"))
        .from(Ident::new(&spec.table));
    for join in &spec.joins {
        apply_join(&mut statement, &spec.table, join);
    }
    if !spec.condition.is_always() {
        statement.cond_where(to_sea_condition(&spec.condition));
    }
    statement
}

/// `INSERT INTO table (...) VALUES (...)`
pub fn insert_statement(table: &str, data: &Row) -> Result<InsertStatement, TideError> {
    if data.is_empty() {
        return Err(TideError::InvalidArgument(format!(
            "no columns to insert into {table}"
        )));
    }
    let mut statement = SeaQuery::insert();
    statement
        .into_table(Ident::new(table))
        .columns(data.keys().map(|name| Ident::new(name)));
    statement
        .values(data.values().map(value_expr))
        .map_err(|e| TideError::Executor(format!("failed to build insert: {e}")))?;
    Ok(statement)
}

/// `UPDATE table SET ... WHERE ...`
pub fn update_statement(spec: &QuerySpec, data: &Row) -> Result<UpdateStatement, TideError> {
    if data.is_empty() {
        return Err(TideError::InvalidArgument(format!(
            "no columns to update on {}",
            spec.table
        )));
    }
    let mut statement = SeaQuery::update();
    statement.table(Ident::new(&spec.table));
    for (name, value) in data {
        statement.value(Ident::new(name), value_expr(value));
    }
    if !spec.condition.is_always() {
        statement.cond_where(to_sea_condition(&spec.condition));
    }
    Ok(statement)
}

/// `DELETE FROM table WHERE ...`
pub fn delete_statement(spec: &QuerySpec) -> DeleteStatement {
    let mut statement = SeaQuery::delete();
    statement.from_table(Ident::new(&spec.table));
    if !spec.condition.is_always() {
        statement.cond_where(to_sea_condition(&spec.condition));
    }
    statement
}
