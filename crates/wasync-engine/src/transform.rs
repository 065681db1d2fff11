//! Normalization of protocol-native values into storage-ready ones.
//!
//! The transport hands over the same logical value in several shapes:
//! timestamps as plain numbers, numeric strings, 64-bit `{low, high}` longs
//! or RFC 3339 strings; binary data as `{type: "Buffer", data}` with either
//! a byte array or base64 `data`, plain byte arrays, index-keyed objects or
//! base64 text. Everything here is pure.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("invalid timestamp for {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("invalid binary value for {field}: {detail}")]
    InvalidBinary { field: &'static str, detail: String },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

/// Unix seconds from any timestamp shape. `null` is absent.
pub fn timestamp(field: &'static str, value: Option<&Value>) -> Result<Option<i64>, TransformError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let invalid = || TransformError::InvalidTimestamp {
        field,
        value: value.to_string(),
    };
    match value {
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.timestamp()))
                .map_err(|_| invalid()),
        },
        other => integer_like(other).map(Some).ok_or_else(invalid),
    }
}

/// Signed integer from a number, numeric string, boolean or long. `null` is absent.
pub fn integer(field: &'static str, value: Option<&Value>) -> Result<Option<i64>, TransformError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        other => integer_like(other),
    };
    parsed.map(Some).ok_or_else(|| TransformError::InvalidValue {
        field,
        detail: format!("expected an integer, got {value}"),
    })
}

/// Raw bytes from any binary shape. A string that is not valid base64 is
/// taken as its UTF-8 bytes. `null` is absent.
pub fn bytes(field: &'static str, value: Option<&Value>) -> Result<Option<Vec<u8>>, TransformError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    let out = match value {
        Value::String(s) => STANDARD
            .decode(s.as_bytes())
            .unwrap_or_else(|_| s.as_bytes().to_vec()),
        Value::Array(items) => byte_array(field, items)?,
        Value::Object(map) => match (map.get("type").and_then(Value::as_str), map.get("data")) {
            (Some("Buffer"), Some(Value::Array(items))) => byte_array(field, items)?,
            (Some("Buffer"), Some(Value::String(encoded))) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| TransformError::InvalidBinary {
                    field,
                    detail: format!("bad base64 buffer data: {e}"),
                })?,
            _ => indexed_bytes(field, map)?,
        },
        other => {
            return Err(TransformError::InvalidBinary {
                field,
                detail: format!("unsupported shape {other}"),
            })
        }
    };
    Ok(Some(out))
}

/// Numeric delivery status from either its number or its name.
pub fn message_status(value: Option<&Value>) -> Result<Option<i64>, TransformError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };
    if let Value::String(name) = value {
        let code = match name.as_str() {
            "ERROR" => Some(0),
            "PENDING" => Some(1),
            "SERVER_ACK" => Some(2),
            "DELIVERY_ACK" => Some(3),
            "READ" => Some(4),
            "PLAYED" => Some(5),
            _ => None,
        };
        if let Some(code) = code {
            return Ok(Some(code));
        }
    }
    integer("status", Some(value))
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn integer_like(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::Object(map) => long_value(map),
        _ => None,
    }
}

/// 64-bit long serialized as two signed 32-bit halves.
fn long_value(map: &Map<String, Value>) -> Option<i64> {
    let low = map.get("low")?.as_i64()?;
    let high = map.get("high")?.as_i64()?;
    Some((high << 32) | (low & 0xffff_ffff))
}

fn byte_array(field: &'static str, items: &[Value]) -> Result<Vec<u8>, TransformError> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| TransformError::InvalidBinary {
                    field,
                    detail: format!("{item} is not a byte"),
                })
        })
        .collect()
}

/// Typed arrays serialized as `{"0": 12, "1": 34, ...}`.
fn indexed_bytes(field: &'static str, map: &Map<String, Value>) -> Result<Vec<u8>, TransformError> {
    let mut out = vec![0u8; map.len()];
    for (key, item) in map {
        let idx = key
            .parse::<usize>()
            .ok()
            .filter(|i| *i < out.len())
            .ok_or_else(|| TransformError::InvalidBinary {
                field,
                detail: format!("unexpected key {key}"),
            })?;
        out[idx] = byte_array(field, std::slice::from_ref(item))?[0];
    }
    Ok(out)
}

/// Non-empty required string.
pub fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, TransformError> {
    if value.is_empty() {
        Err(TransformError::MissingField(field))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_shapes() {
        let cases = [
            (json!(1700000000), 1_700_000_000),
            (json!("1700000000"), 1_700_000_000),
            (json!(1700000000.9), 1_700_000_000),
            (json!({"low": 1700000000, "high": 0, "unsigned": true}), 1_700_000_000),
            (json!("2023-11-14T22:13:20Z"), 1_700_000_000),
        ];
        for (input, expected) in cases {
            assert_eq!(timestamp("ts", Some(&input)).unwrap(), Some(expected), "{input}");
        }
    }

    #[test]
    fn long_with_high_bits() {
        let value = json!({"low": -1, "high": 1});
        assert_eq!(timestamp("ts", Some(&value)).unwrap(), Some((1i64 << 32) | 0xffff_ffff));
    }

    #[test]
    fn null_and_absent_are_none() {
        assert_eq!(timestamp("ts", None).unwrap(), None);
        assert_eq!(timestamp("ts", Some(&Value::Null)).unwrap(), None);
        assert_eq!(bytes("b", Some(&Value::Null)).unwrap(), None);
        assert_eq!(integer("n", None).unwrap(), None);
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let err = timestamp("conversationTimestamp", Some(&json!("yesterday"))).unwrap_err();
        assert!(matches!(
            err,
            TransformError::InvalidTimestamp { field: "conversationTimestamp", .. }
        ));
        assert!(timestamp("ts", Some(&json!([1]))).is_err());
    }

    #[test]
    fn buffer_object_to_bytes() {
        let value = json!({"type": "Buffer", "data": [104, 105]});
        assert_eq!(bytes("tcToken", Some(&value)).unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn buffer_object_with_base64_data() {
        let value = json!({"type": "Buffer", "data": "AQI="});
        assert_eq!(bytes("tcToken", Some(&value)).unwrap(), Some(vec![1, 2]));

        let broken = json!({"type": "Buffer", "data": "***"});
        assert!(matches!(
            bytes("tcToken", Some(&broken)),
            Err(TransformError::InvalidBinary { field: "tcToken", .. })
        ));
    }

    #[test]
    fn byte_array_and_indexed_object() {
        assert_eq!(bytes("k", Some(&json!([1, 2, 255]))).unwrap(), Some(vec![1, 2, 255]));
        assert_eq!(
            bytes("k", Some(&json!({"1": 2, "0": 1}))).unwrap(),
            Some(vec![1, 2])
        );
        assert!(bytes("k", Some(&json!([256]))).is_err());
        assert!(bytes("k", Some(&json!({"x": 1}))).is_err());
    }

    #[test]
    fn base64_string_is_decoded_and_plain_text_kept() {
        assert_eq!(bytes("k", Some(&json!("aGk="))).unwrap(), Some(b"hi".to_vec()));
        assert_eq!(
            bytes("k", Some(&json!("not base64!"))).unwrap(),
            Some(b"not base64!".to_vec())
        );
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(integer("n", Some(&json!("-3"))).unwrap(), Some(-3));
        assert_eq!(integer("n", Some(&json!(true))).unwrap(), Some(1));
        assert!(integer("n", Some(&json!("three"))).is_err());
    }

    #[test]
    fn status_by_name_or_number() {
        assert_eq!(message_status(Some(&json!("READ"))).unwrap(), Some(4));
        assert_eq!(message_status(Some(&json!("SERVER_ACK"))).unwrap(), Some(2));
        assert_eq!(message_status(Some(&json!(3))).unwrap(), Some(3));
        assert!(message_status(Some(&json!("LOST"))).is_err());
    }

    #[test]
    fn required_rejects_empty() {
        assert_eq!(required("id", "c1").unwrap(), "c1");
        assert_eq!(required("id", "").unwrap_err(), TransformError::MissingField("id"));
    }
}
