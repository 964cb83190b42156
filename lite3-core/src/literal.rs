//! SQL literal rendering.

use crate::value::Value;

/// Render a host value as an SQL literal.
///
/// The rendered text, evaluated as an SQL expression, yields the same value
/// that binding the host value as a parameter would.
///
/// ```rust
/// use lite3_core::literal;
///
/// assert_eq!(literal("a'b"), "'a''b'");
/// assert_eq!(literal(true), "1");
/// assert_eq!(literal(None::<i64>), "NULL");
/// assert_eq!(literal(vec![0xca_u8, 0xfe]), "X'CAFE'");
/// ```
pub fn literal(value: impl Into<Value>) -> String {
    match value.into() {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => float_literal(f),
        Value::Text(s) => quote(&s),
        Value::Blob(b) if b.is_empty() => "NULL".to_string(),
        Value::Blob(b) => format!("X'{}'", hex::encode_upper(b)),
    }
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "9e999" } else { "-9e999" }.to_string()
    } else {
        // Debug keeps a fractional part or exponent, so the engine reads REAL.
        format!("{:?}", f)
    }
}

fn quote(s: &str) -> String {
    // A quoted literal ends at NUL, so such text goes through a blob.
    if s.contains('\0') {
        return format!("CAST(X'{}' AS TEXT)", hex::encode_upper(s));
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
