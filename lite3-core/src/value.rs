//! Dynamic SQLite values and coercion to host types.

use std::fmt;

use serde_json::Value as JsonValue;

use crate::error::{SqliteError, SqliteResult};

/// The storage class of a value as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `SQLITE_INTEGER`.
    Integer,
    /// `SQLITE_FLOAT`.
    Float,
    /// `SQLITE_TEXT`.
    Text,
    /// `SQLITE_BLOB`.
    Blob,
    /// `SQLITE_NULL`.
    Null,
}

impl ValueType {
    /// The SQL name of this storage class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Null => "NULL",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owned value decoded from the engine.
///
/// `Null` is the "no value" marker: it is distinct from `Integer(0)` and from
/// an empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// The storage class of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Integer(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Float,
            Self::Text(_) => ValueType::Text,
            Self::Blob(_) => ValueType::Blob,
        }
    }

    /// Check if this is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The integer payload, without coercion.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The text payload, without coercion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The blob payload, without coercion.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Coerce this value to `T`.
    pub fn get<T: FromValue>(&self) -> SqliteResult<T> {
        T::from_value(self)
    }

    /// Coerce this value to `T`, returning `default` for NULL or for an empty
    /// string/byte sequence.
    pub fn get_or<T: FromValue>(&self, default: T) -> SqliteResult<T> {
        if self.is_null() {
            return Ok(default);
        }
        let value = T::from_value(self)?;
        if value.is_vacant() {
            Ok(default)
        } else {
            Ok(value)
        }
    }
}

impl From<&Value> for JsonValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Blob(b) => JsonValue::String(hex::encode(b)),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Integer(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Conversion from a [`Value`] to a host type.
///
/// Conversions are coercive: an `INTEGER` can be read as a `String`, a
/// numeric `TEXT` as an `i64`, and so on. NULL is rejected unless the target
/// is `Option<_>` or [`Value`].
pub trait FromValue: Sized {
    /// Convert a non-NULL value.
    fn from_value(value: &Value) -> SqliteResult<Self>;

    /// Whether a converted value counts as "empty" for defaulting purposes.
    fn is_vacant(&self) -> bool {
        false
    }
}

fn mismatch<T>(value: &Value, target: &str) -> SqliteResult<T> {
    Err(SqliteError::decode(format!(
        "cannot convert {} to {}",
        value.value_type(),
        target
    )))
}

fn to_i64(value: &Value, target: &str) -> SqliteResult<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => {
            let truncated = f.trunc();
            if truncated.is_finite()
                && truncated >= i64::MIN as f64
                && truncated < i64::MAX as f64
            {
                Ok(truncated as i64)
            } else {
                Err(SqliteError::decode(format!(
                    "{} is out of range for {}",
                    f, target
                )))
            }
        }
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .or_else(|_| {
                    trimmed
                        .parse::<f64>()
                        .map_err(|_| ())
                        .and_then(|f| to_i64(&Value::Float(f), target).map_err(|_| ()))
                })
                .map_err(|_| {
                    SqliteError::decode(format!("cannot parse '{}' as {}", s, target))
                })
        }
        Value::Null => Err(SqliteError::decode(format!(
            "unexpected NULL for {}",
            target
        ))),
        Value::Blob(_) => mismatch(value, target),
    }
}

macro_rules! from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> SqliteResult<Self> {
                    let target = stringify!($t);
                    let i = to_i64(value, target)?;
                    <$t>::try_from(i).map_err(|_| {
                        SqliteError::decode(format!("{} is out of range for {}", i, target))
                    })
                }
            }
        )*
    };
}

from_value_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for i64 {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        to_i64(value, "i64")
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| SqliteError::decode(format!("cannot parse '{}' as f64", s))),
            Value::Null => Err(SqliteError::decode("unexpected NULL for f64")),
            Value::Blob(_) => mismatch(value, "f64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        match value {
            Value::Float(f) => Ok(*f != 0.0),
            _ => to_i64(value, "bool").map(|i| i != 0),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Blob(b) => String::from_utf8(b.clone())
                .map_err(|_| SqliteError::decode("blob is not valid UTF-8")),
            Value::Null => Err(SqliteError::decode("unexpected NULL for String")),
        }
    }

    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        match value {
            Value::Blob(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            Value::Null => Err(SqliteError::decode("unexpected NULL for Vec<u8>")),
            _ => mismatch(value, "Vec<u8>"),
        }
    }

    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> SqliteResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::Null.value_type(), ValueType::Null);
        assert_eq!(Value::Integer(1).value_type(), ValueType::Integer);
        assert_eq!(Value::Float(1.0).value_type(), ValueType::Float);
        assert_eq!(Value::from("x").value_type(), ValueType::Text);
        assert_eq!(Value::from(vec![1u8]).value_type(), ValueType::Blob);
        assert_eq!(ValueType::Float.to_string(), "FLOAT");
    }

    #[test]
    fn test_null_is_distinct_from_zero() {
        assert_ne!(Value::Null, Value::Integer(0));
        assert_eq!(Value::Null.get::<Value>().unwrap(), Value::Null);
        assert_eq!(Value::Null.get::<Option<i64>>().unwrap(), None);
    }

    #[test]
    fn test_get_or_default_for_null() {
        assert_eq!(Value::Null.get_or(-42i64).unwrap(), -42);
        assert_eq!(
            Value::Null.get_or("fallback".to_string()).unwrap(),
            "fallback"
        );
    }

    #[test]
    fn test_get_or_default_for_empty_text() {
        let value = Value::Text(String::new());
        assert_eq!(value.get_or("fallback".to_string()).unwrap(), "fallback");
        assert_eq!(Value::Blob(vec![]).get_or(vec![9u8]).unwrap(), vec![9u8]);
    }

    #[test]
    fn test_null_rejected_for_plain_types() {
        let err = Value::Null.get::<i64>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
    }

    #[test]
    fn test_integer_coercions() {
        assert_eq!(Value::Integer(42).get::<String>().unwrap(), "42");
        assert_eq!(Value::Integer(42).get::<f64>().unwrap(), 42.0);
        assert!(Value::Integer(2).get::<bool>().unwrap());
        assert!(Value::Integer(300).get::<u8>().is_err());
        assert!(Value::Integer(-1).get::<u64>().is_err());
    }

    #[test]
    fn test_float_truncates_to_integer() {
        assert_eq!(Value::Float(3.9).get::<i64>().unwrap(), 3);
        assert_eq!(Value::Float(-3.9).get::<i32>().unwrap(), -3);
        assert!(Value::Float(f64::NAN).get::<i64>().is_err());
    }

    #[test]
    fn test_text_parses_numbers() {
        assert_eq!(Value::from(" 17 ").get::<i64>().unwrap(), 17);
        assert_eq!(Value::from("2.5").get::<f64>().unwrap(), 2.5);
        assert_eq!(Value::from("2.5").get::<i64>().unwrap(), 2);
        assert!(Value::from("abc").get::<i64>().is_err());
    }

    #[test]
    fn test_blob_conversions() {
        assert_eq!(Value::from(vec![1u8, 2]).get::<Vec<u8>>().unwrap(), vec![1, 2]);
        assert_eq!(Value::from("ab").get::<Vec<u8>>().unwrap(), b"ab".to_vec());
        assert!(Value::Integer(1).get::<Vec<u8>>().is_err());
        assert!(Value::Blob(vec![0xff]).get::<String>().is_err());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
        assert_eq!(Value::from(true), Value::Integer(1));
    }

    #[test]
    fn test_json_rendering() {
        assert_eq!(JsonValue::from(&Value::Integer(3)), serde_json::json!(3));
        assert_eq!(JsonValue::from(&Value::Null), JsonValue::Null);
        assert_eq!(
            JsonValue::from(&Value::Blob(vec![0xde, 0xad])),
            serde_json::json!("dead")
        );
    }
}
