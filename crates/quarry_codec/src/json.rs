//! Conversion between values and JSON.
//!
//! Types JSON cannot express use single-key wrapper objects:
//!
//! | Value | JSON |
//! |-------|------|
//! | `Date(ms)` | `{"$date": ms}` |
//! | `Long(n)` | `{"$numberLong": "n"}` |
//! | `Undefined` | `{"$undefined": true}` |
//!
//! Plain JSON integers become `Int` when they fit in 32 bits and `Long`
//! otherwise; JSON numbers with a fraction or exponent become `Double`.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde_json::{json, Map, Number};
use std::fmt;

impl Value {
    /// Converts a JSON value.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => number_to_value(&n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                extended_value(&map).unwrap_or_else(|| Self::Document(object_to_document(map)))
            }
        }
    }

    /// Parses JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidJson`] if the text is not valid JSON.
    pub fn from_json_str(text: &str) -> CodecResult<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::invalid_json(e.to_string()))?;
        Ok(Self::from_json(json))
    }

    /// Converts to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined => json!({ "$undefined": true }),
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Long(n) => json!({ "$numberLong": n.to_string() }),
            Self::Double(d) => Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Date(millis) => json!({ "$date": millis }),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Document(doc) => doc.to_json(),
        }
    }
}

impl Document {
    /// Converts a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidJson`] if `json` is not an object.
    pub fn from_json(json: serde_json::Value) -> CodecResult<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Ok(doc),
            other => Err(CodecError::invalid_json(format!(
                "expected an object, found {}",
                other.value_type()
            ))),
        }
    }

    /// Parses a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidJson`] for invalid JSON or a non-object.
    pub fn from_json_str(text: &str) -> CodecResult<Self> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::invalid_json(e.to_string()))?;
        Self::from_json(json)
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map: Map<String, serde_json::Value> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::int_or_long(i)
    } else if let Some(u) = n.as_u64() {
        i64::try_from(u).map_or(Value::Double(n.as_f64().unwrap_or(f64::NAN)), Value::Long)
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn extended_value(map: &Map<String, serde_json::Value>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    match (key.as_str(), value) {
        ("$date", serde_json::Value::Number(n)) => n.as_i64().map(Value::Date),
        ("$numberLong", serde_json::Value::String(s)) => s.parse().ok().map(Value::Long),
        ("$undefined", serde_json::Value::Bool(true)) => Some(Value::Undefined),
        _ => None,
    }
}

fn object_to_document(map: Map<String, serde_json::Value>) -> Document {
    map.into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
