//! JSON <-> Value conversion and typed result decoding

use serde::de::DeserializeOwned;

use crate::{error::DecodeError, value::Value};

/// Convert serde_json::Value to Value
pub fn from_json(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(from_json).collect()),
        serde_json::Value::Object(obj) => {
            Value::Object(obj.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Convert Value to serde_json::Value
///
/// Non-finite floats have no JSON form and become `null`.
pub fn to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s),
        Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(to_json).collect()),
        Value::Object(obj) => {
            serde_json::Value::Object(obj.into_iter().map(|(k, v)| (k, to_json(v))).collect())
        }
    }
}

/// Decode a whole buffer into a `Value`.
pub fn decode_slice(bytes: &[u8], preview_len: usize) -> Result<Value, DecodeError> {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .map(from_json)
        .map_err(|e| {
            let offset = offset_of(bytes, e.line(), e.column());
            DecodeError::at(e.to_string(), offset as u64, bytes, offset, preview_len)
        })
}

/// Convert a query result into the caller's declared element type.
pub fn decode_value<R: DeserializeOwned>(
    value: Value,
    preview_len: usize,
) -> Result<R, DecodeError> {
    let json = to_json(value);
    match R::deserialize(&json) {
        Ok(r) => Ok(r),
        Err(e) => {
            let text = json.to_string();
            Err(DecodeError::with_preview(
                format!("cannot convert element to {}: {}", std::any::type_name::<R>(), e),
                &text,
                preview_len,
            ))
        }
    }
}

/// serde_json reports 1-based line/column; turn that back into a byte offset.
fn offset_of(bytes: &[u8], line: usize, column: usize) -> usize {
    let mut current = 1;
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        if current == line {
            break;
        }
        if *b == b'\n' {
            current += 1;
            start = i + 1;
        }
    }
    (start + column.saturating_sub(1)).min(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_kinds_survive() {
        let v = from_json(serde_json::json!({"i": 3, "f": 2.5}));
        assert_eq!(v["i"], Value::Integer(3));
        assert_eq!(v["f"], Value::Float(2.5));
        assert_eq!(to_json(v), serde_json::json!({"i": 3, "f": 2.5}));
    }

    #[test]
    fn test_decode_error_carries_preview() {
        let err = decode_slice(b"[1, 2, oops]", 48).unwrap_err();
        assert!(err.preview.contains("oops"));
        assert!(err.offset.is_some_and(|o| o <= 12));
    }

    #[test]
    fn test_decode_value_typed() {
        let v = Value::object([("a", Value::Integer(2))]);
        let map: std::collections::HashMap<String, i32> = decode_value(v, 48).unwrap();
        assert_eq!(map["a"], 2);
        assert!(decode_value::<String>(Value::Integer(1), 48).is_err());
    }
}
