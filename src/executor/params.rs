//! Parameter conversion from `sea_query` values to `may_postgres`.
//!
//! Values are first collected into owned [`Param`]s, then borrowed as
//! `&dyn ToSql` for the duration of the closure, so references stay valid
//! while the statement runs.
//!
//! A [`Param`] adapts to the type PostgreSQL inferred for its placeholder:
//! an integer binds to `int2`, `int4` or `int8` columns alike, and text binds
//! to `json`/`jsonb` columns by parsing it.

use crate::{Result, TideError};
use bytes::BytesMut;
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use sea_query::Value;
use std::error::Error;

type BoxError = Box<dyn Error + Sync + Send>;

/// One owned statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Param {
    /// Owned parameter for a `sea_query` value
    ///
    /// # Errors
    ///
    /// `Executor` for value types this crate never produces (bytes, dates,
    /// unsigned integers above `i64::MAX`, ...).
    pub fn from_sea(value: &Value) -> Result<Self> {
        let param = match value {
            Value::Bool(Some(b)) => Param::Bool(*b),
            Value::TinyInt(Some(i)) => Param::Int(i64::from(*i)),
            Value::SmallInt(Some(i)) => Param::Int(i64::from(*i)),
            Value::Int(Some(i)) => Param::Int(i64::from(*i)),
            Value::BigInt(Some(i)) => Param::Int(*i),
            Value::Unsigned(Some(u)) => Param::Int(i64::from(*u)),
            Value::BigUnsigned(Some(u)) => Param::Int(i64::try_from(*u).map_err(|_| {
                TideError::Executor(format!(
                    "BigUnsigned value {u} exceeds i64::MAX, cannot be bound"
                ))
            })?),
            Value::Float(Some(f)) => Param::Float(f64::from(*f)),
            Value::Double(Some(d)) => Param::Float(*d),
            Value::String(Some(s)) => Param::Text(s.to_string()),
            Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None) => Param::Null,
            other => {
                return Err(TideError::Executor(format!(
                    "Unsupported value type in query: {other:?}"
                )))
            }
        };
        Ok(param)
    }
}

/// Bind `value` after checking the column type accepts it.
fn bind<T: ToSql>(value: &T, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if !T::accepts(ty) {
        return Err(format!(
            "cannot bind {} to a parameter of type {ty}",
            std::any::type_name::<T>()
        )
        .into());
    }
    value.to_sql(ty, out)
}

impl ToSql for Param {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Param::Null => Ok(IsNull::Yes),
            Param::Bool(b) => bind(b, ty, out),
            Param::Int(i) => match *ty {
                Type::INT2 => bind(&i16::try_from(*i)?, ty, out),
                Type::INT4 => bind(&i32::try_from(*i)?, ty, out),
                Type::FLOAT8 => bind(&(*i as f64), ty, out),
                _ => bind(i, ty, out),
            },
            Param::Float(f) => match *ty {
                Type::FLOAT4 => bind(&(*f as f32), ty, out),
                _ => bind(f, ty, out),
            },
            Param::Text(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    bind(&serde_json::from_str::<serde_json::Value>(s)?, ty, out)
                }
                _ => bind(s, ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert `values` and run `f` with them as `may_postgres` parameters.
///
/// # Errors
///
/// Returns `Executor` if an unsupported value type is encountered, or
/// whatever `f` returns.
pub fn with_converted_params<F, R>(values: &sea_query::Values, f: F) -> Result<R>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R>,
{
    let owned = values
        .iter()
        .map(Param::from_sea)
        .collect::<Result<Vec<_>>>()?;
    let params: Vec<&dyn ToSql> = owned.iter().map(|p| p as &dyn ToSql).collect();
    f(&params)
}
