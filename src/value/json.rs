//! Tagged JSON values of the pipeline protocol.
//!
//! ```json
//! {"type":"integer","value":"42"}
//! {"type":"blob","base64":"AAEC"}
//! ```
//!
//! Integers and floats are sent as decimal strings. Incoming values accept either a
//! string or a bare JSON number, since servers differ on which they emit for floats.
//! NaN and infinities have no representation the endpoint accepts and are refused before
//! anything is sent.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::{Deserialize, Deserializer, Serialize};

use super::sql::SqlValue;
use crate::{Error, Result};

/// A single tagged value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireValue {
    /// `{"type":"null"}`.
    Null,
    /// `{"type":"integer","value":"…"}`.
    Integer {
        /// Decimal digits.
        #[serde(deserialize_with = "string_or_number")]
        value: String,
    },
    /// `{"type":"float","value":"…"}`.
    Float {
        /// Decimal representation.
        #[serde(deserialize_with = "string_or_number")]
        value: String,
    },
    /// `{"type":"text","value":"…"}`.
    Text {
        /// The text.
        value: String,
    },
    /// `{"type":"blob","base64":"…"}`.
    Blob {
        /// Base64 payload.
        base64: String,
    },
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// Checks that `value` can be sent as a pipeline argument.
///
/// # Errors
///
/// Returns [`Error::Binding`] labelled `label` for a non-finite real.
pub fn ensure_sendable(value: &SqlValue, label: &str) -> Result<()> {
    match value {
        SqlValue::Real(f) if !f.is_finite() => Err(Error::binding(
            label,
            format!("non-finite float {f} cannot be sent to the pipeline endpoint"),
        )),
        _ => Ok(()),
    }
}

/// Encodes positional pipeline arguments, labelling failures `#1`, `#2`, ...
///
/// # Errors
///
/// See [`ensure_sendable`].
pub fn to_json_args(values: &[SqlValue]) -> Result<Vec<WireValue>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            ensure_sendable(value, &format!("#{}", i + 1))?;
            Ok(encode_arg(value))
        })
        .collect()
}

/// Encodes a value as a pipeline argument.
///
/// # Errors
///
/// See [`ensure_sendable`].
pub fn to_json_arg(value: &SqlValue) -> Result<WireValue> {
    ensure_sendable(value, "value")?;
    Ok(encode_arg(value))
}

fn encode_arg(value: &SqlValue) -> WireValue {
    match value {
        SqlValue::Null => WireValue::Null,
        SqlValue::Integer(n) => WireValue::Integer {
            value: n.to_string(),
        },
        SqlValue::Real(f) => WireValue::Float {
            value: format_float(*f),
        },
        SqlValue::Text(s) => WireValue::Text { value: s.clone() },
        SqlValue::Blob(b) => WireValue::Blob {
            base64: STANDARD.encode(b),
        },
    }
}

// `{:?}` keeps a decimal point on whole numbers and prints the shortest
// representation that parses back to the same f64.
fn format_float(f: f64) -> String {
    format!("{f:?}")
}

/// Decodes a value received from the pipeline endpoint.
///
/// # Errors
///
/// Returns [`Error::Transport`] when a numeric or base64 payload is malformed.
pub fn from_wire(value: &WireValue) -> Result<SqlValue> {
    Ok(match value {
        WireValue::Null => SqlValue::Null,
        WireValue::Integer { value } => SqlValue::Integer(parse_integer(value)?),
        WireValue::Float { value } => SqlValue::Real(value.trim().parse::<f64>().map_err(|e| {
            Error::transport("decode_value", format!("malformed float '{value}': {e}"))
        })?),
        WireValue::Text { value } => SqlValue::Text(value.clone()),
        WireValue::Blob { base64 } => SqlValue::Blob(
            STANDARD
                .decode(base64)
                .or_else(|_| STANDARD_NO_PAD.decode(base64))
                .map_err(|e| {
                    Error::transport("decode_value", format!("malformed base64 blob: {e}"))
                })?,
        ),
    })
}

fn parse_integer(text: &str) -> Result<i64> {
    text.trim().parse::<i64>().map_err(|e| {
        Error::transport("decode_value", format!("malformed integer '{text}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_serializes_as_decimal_string() {
        let arg = serde_json::to_value(to_json_arg(&SqlValue::Integer(1)).unwrap()).unwrap();
        assert_eq!(arg, json!({"type": "integer", "value": "1"}));
    }

    #[test]
    fn test_null_and_text_shapes() {
        assert_eq!(
            serde_json::to_value(to_json_arg(&SqlValue::Null).unwrap()).unwrap(),
            json!({"type": "null"})
        );
        assert_eq!(
            serde_json::to_value(to_json_arg(&SqlValue::Text("Alice".into())).unwrap()).unwrap(),
            json!({"type": "text", "value": "Alice"})
        );
    }

    #[test]
    fn test_float_keeps_decimal_point() {
        let arg = serde_json::to_value(to_json_arg(&SqlValue::Real(2.0)).unwrap()).unwrap();
        assert_eq!(arg, json!({"type": "float", "value": "2.0"}));
    }

    #[test]
    fn test_non_finite_floats_are_refused() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                to_json_arg(&SqlValue::Real(f)),
                Err(Error::Binding { ref parameter, .. }) if parameter == "value"
            ));
        }
        let err = to_json_args(&[SqlValue::Real(1.0), SqlValue::Real(f64::NAN)]).unwrap_err();
        assert!(matches!(err, Error::Binding { ref parameter, .. } if parameter == "#2"));
    }

    #[test]
    fn test_blob_travels_as_base64() {
        let arg = serde_json::to_value(to_json_arg(&SqlValue::Blob(vec![0, 1, 2])).unwrap()).unwrap();
        assert_eq!(arg, json!({"type": "blob", "base64": "AAEC"}));
        let back: WireValue = serde_json::from_value(arg).unwrap();
        assert_eq!(from_wire(&back).unwrap(), SqlValue::Blob(vec![0, 1, 2]));
    }

    #[test]
    fn test_decode_accepts_numbers_and_strings() {
        let from_string: WireValue =
            serde_json::from_value(json!({"type": "integer", "value": "7"})).unwrap();
        let from_number: WireValue =
            serde_json::from_value(json!({"type": "float", "value": 0.5})).unwrap();
        assert_eq!(from_wire(&from_string).unwrap(), SqlValue::Integer(7));
        assert_eq!(from_wire(&from_number).unwrap(), SqlValue::Real(0.5));
    }

    #[test]
    fn test_unpadded_base64_is_accepted() {
        let value = WireValue::Blob {
            base64: "AAE".to_string(),
        };
        assert_eq!(from_wire(&value).unwrap(), SqlValue::Blob(vec![0, 1]));
    }

    #[test]
    fn test_malformed_integer_is_transport_error() {
        let value = WireValue::Integer {
            value: "12abc".to_string(),
        };
        assert!(matches!(from_wire(&value), Err(Error::Transport { .. })));
    }
}
