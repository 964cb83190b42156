//! Host-to-native type mapping for parameter binding.
//!
//! [`ToSql`] maps a host value onto one of the native bind calls described by
//! [`BindValue`]. Types that do not implement it cannot be bound at all, so an
//! unsupported parameter type is a compile error rather than a runtime one.

use std::borrow::Cow;

use crate::error::{SqliteError, SqliteResult};
use crate::value::Value;

/// The native bind call a host value maps onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindValue<'a> {
    /// `sqlite3_bind_null`.
    Null,
    /// `sqlite3_bind_int`, for types no wider than 32 bits.
    Int(i32),
    /// `sqlite3_bind_int64`, for wider integral types.
    Int64(i64),
    /// `sqlite3_bind_double`.
    Double(f64),
    /// `sqlite3_bind_text`.
    Text(&'a str),
    /// `sqlite3_bind_blob`; a zero-length slice binds NULL.
    Blob(&'a [u8]),
}

impl From<BindValue<'_>> for Value {
    fn from(value: BindValue<'_>) -> Self {
        match value {
            BindValue::Null => Value::Null,
            BindValue::Int(i) => Value::Integer(i64::from(i)),
            BindValue::Int64(i) => Value::Integer(i),
            BindValue::Double(f) => Value::Float(f),
            BindValue::Text(s) => Value::Text(s.to_owned()),
            BindValue::Blob(b) if b.is_empty() => Value::Null,
            BindValue::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// A value that can be bound to a statement parameter.
pub trait ToSql {
    /// Map this value onto a native bind call.
    fn to_sql(&self) -> SqliteResult<BindValue<'_>>;
}

/// Explicit SQL NULL, for binding without an `Option`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Null;

impl ToSql for Null {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Null)
    }
}

macro_rules! to_sql_int {
    ($($t:ty),*) => {
        $(
            impl ToSql for $t {
                fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
                    Ok(BindValue::Int(i32::from(*self)))
                }
            }
        )*
    };
}

macro_rules! to_sql_int64 {
    ($($t:ty),*) => {
        $(
            impl ToSql for $t {
                fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
                    i64::try_from(*self).map(BindValue::Int64).map_err(|_| {
                        SqliteError::bind(format!(
                            "{} {} is too large for a 64-bit integer parameter",
                            stringify!($t),
                            self
                        ))
                    })
                }
            }
        )*
    };
}

to_sql_int!(bool, i8, i16, i32, u8, u16);
to_sql_int64!(i64, isize, u32, u64, usize);

impl ToSql for f32 {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Double(f64::from(*self)))
    }
}

impl ToSql for f64 {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Double(*self))
    }
}

impl ToSql for str {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Text(self))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Text(self))
    }
}

impl ToSql for Cow<'_, str> {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Text(self))
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Blob(self))
    }
}

impl<const N: usize> ToSql for [u8; N] {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Blob(self))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Blob(self))
    }
}

impl ToSql for Cow<'_, [u8]> {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(BindValue::Blob(self))
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        Ok(match self {
            Value::Null => BindValue::Null,
            Value::Integer(i) => BindValue::Int64(*i),
            Value::Float(f) => BindValue::Double(*f),
            Value::Text(s) => BindValue::Text(s),
            Value::Blob(b) => BindValue::Blob(b),
        })
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(BindValue::Null),
        }
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        (**self).to_sql()
    }
}

impl<T: ToSql + ?Sized> ToSql for Box<T> {
    fn to_sql(&self) -> SqliteResult<BindValue<'_>> {
        (**self).to_sql()
    }
}
