//! Dotted field references such as `$a.b.c`.

use crate::error::{CoreError, CoreResult};
use quarry_codec::{Document, Value};
use std::fmt;

/// A parsed dotted path, stored without the leading `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses `a.b.c`.
    ///
    /// # Errors
    ///
    /// Code 15998 for an empty segment, 16410 for a segment starting
    /// with `$`.
    pub fn parse(path: &str) -> CoreResult<Self> {
        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(CoreError::user(
                    15998,
                    format!("field names cannot be empty: {path:?}"),
                ));
            }
            if segment.starts_with('$') {
                return Err(CoreError::user(
                    16410,
                    format!("field names cannot start with '$': {path:?}"),
                ));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// A single-segment path naming a top-level field, taken verbatim.
    #[must_use]
    pub fn from_segment(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; a path has at least one segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the path as a `$`-prefixed reference.
    #[must_use]
    pub fn to_reference(&self) -> String {
        format!("${self}")
    }

    /// Looks the path up in `doc`.
    ///
    /// Arrays met on the way are mapped element-wise. A missing field, or
    /// descending into null or a scalar, yields `Undefined`.
    ///
    /// # Errors
    ///
    /// Code 16014 if an array being mapped holds a scalar.
    pub fn evaluate(&self, doc: &Document) -> CoreResult<Value> {
        self.evaluate_from(doc, 0)
    }

    fn evaluate_from(&self, doc: &Document, index: usize) -> CoreResult<Value> {
        let Some(value) = doc.get(&self.segments[index]) else {
            return Ok(Value::Undefined);
        };
        if index + 1 == self.segments.len() {
            return Ok(value.clone());
        }
        self.descend(value, index + 1)
    }

    fn descend(&self, value: &Value, index: usize) -> CoreResult<Value> {
        match value {
            Value::Document(inner) => self.evaluate_from(inner, index),
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Null | Value::Undefined => mapped.push(item.clone()),
                        Value::Document(inner) => mapped.push(self.evaluate_from(inner, index)?),
                        other => {
                            return Err(CoreError::user(
                                16014,
                                format!(
                                    "the element of an array at {self} is a {}, not an object",
                                    other.value_type()
                                ),
                            ))
                        }
                    }
                }
                Ok(Value::Array(mapped))
            }
            _ => Ok(Value::Undefined),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> Document {
        Document::from_json_str(json).unwrap()
    }

    #[test]
    fn rejects_bad_paths() {
        assert_eq!(FieldPath::parse("a..b").unwrap_err().code(), Some(15998));
        assert_eq!(FieldPath::parse("a.$b").unwrap_err().code(), Some(16410));
        let path = FieldPath::parse("a.b").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.to_reference(), "$a.b");
    }

    #[test]
    fn nested_lookup() {
        let path = FieldPath::parse("a.b").unwrap();
        assert_eq!(path.evaluate(&doc(r#"{"a": {"b": 3}}"#)).unwrap(), Value::Int(3));
        assert_eq!(path.evaluate(&doc(r#"{"a": 1}"#)).unwrap(), Value::Undefined);
        assert_eq!(path.evaluate(&doc(r#"{"a": null}"#)).unwrap(), Value::Undefined);
        assert_eq!(path.evaluate(&doc(r#"{"x": 1}"#)).unwrap(), Value::Undefined);
    }

    #[test]
    fn arrays_are_mapped() {
        let path = FieldPath::parse("a.b").unwrap();
        let value = path
            .evaluate(&doc(r#"{"a": [{"b": 1}, {"c": 2}, null, {"b": [3]}]}"#))
            .unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Int(1),
                Value::Undefined,
                Value::Null,
                Value::Array(vec![Value::Int(3)]),
            ])
        );
        let err = path.evaluate(&doc(r#"{"a": [1]}"#)).unwrap_err();
        assert_eq!(err.code(), Some(16014));
    }
}
