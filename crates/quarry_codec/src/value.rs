//! Dynamic document value type.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A dynamically typed document value.
///
/// `Undefined` doubles as "missing": evaluating a path that does not exist
/// yields it, and a document field computed as `Undefined` is left out of
/// the output. `Null` is a present value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing or undefined.
    Undefined,
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// IEEE 754 double.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Milliseconds since the Unix epoch, UTC.
    Date(i64),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Embedded document.
    Document(Document),
}

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// See [`Value::Undefined`].
    Undefined,
    /// See [`Value::Null`].
    Null,
    /// See [`Value::Bool`].
    Bool,
    /// See [`Value::Int`].
    Int,
    /// See [`Value::Long`].
    Long,
    /// See [`Value::Double`].
    Double,
    /// See [`Value::String`].
    String,
    /// See [`Value::Date`].
    Date,
    /// See [`Value::Array`].
    Array,
    /// See [`Value::Document`].
    Document,
}

impl ValueType {
    /// Returns the display name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Date => "date",
            Self::Array => "array",
            Self::Document => "object",
        }
    }

    /// Rank used to order values of different types.
    ///
    /// All numeric types share a rank so that they compare by value.
    const fn canonical_rank(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Null => 5,
            Self::Int | Self::Long | Self::Double => 10,
            Self::String => 15,
            Self::Document => 20,
            Self::Array => 25,
            Self::Bool => 40,
            Self::Date => 45,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric types, narrowest first.
///
/// Arithmetic on mixed operands produces the widest operand type:
/// `Int < Long < Double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Double.
    Double,
}

impl NumericType {
    /// Returns the wider of two numeric types.
    #[must_use]
    pub fn widest(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Value {
    /// Returns the type tag of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Undefined => ValueType::Undefined,
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Date(_) => ValueType::Date,
            Self::Array(_) => ValueType::Array,
            Self::Document(_) => ValueType::Document,
        }
    }

    /// Returns an `Int` when `n` fits in 32 bits, otherwise a `Long`.
    #[must_use]
    pub fn int_or_long(n: i64) -> Self {
        i32::try_from(n).map_or(Self::Long(n), Self::Int)
    }

    /// Returns the numeric type, or `None` for non-numeric values.
    #[must_use]
    pub fn numeric_type(&self) -> Option<NumericType> {
        match self {
            Self::Int(_) => Some(NumericType::Int),
            Self::Long(_) => Some(NumericType::Long),
            Self::Double(_) => Some(NumericType::Double),
            _ => None,
        }
    }

    /// Returns true for `Int`, `Long` and `Double`.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.numeric_type().is_some()
    }

    /// Returns true for `Undefined`.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns true for `Null` or `Undefined`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    /// Get this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Get this value as a document, if it is one.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Coerces to a boolean.
    ///
    /// `Undefined`, `Null`, `false` and numeric zero are false; everything
    /// else, including empty strings and arrays, is true.
    #[must_use]
    pub fn coerce_to_bool(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Long(n) => *n != 0,
            Self::Double(d) => *d != 0.0,
            _ => true,
        }
    }

    /// Coerces a numeric or nullish value to `i32`.
    ///
    /// # Errors
    ///
    /// Returns a conversion error (code 16003) for other types.
    #[allow(clippy::cast_possible_truncation)]
    pub fn coerce_to_int(&self) -> CodecResult<i32> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Long(n) => Ok(*n as i32),
            Self::Double(d) => Ok(*d as i32),
            Self::Undefined | Self::Null => Ok(0),
            other => Err(conversion_error(16003, other, "int")),
        }
    }

    /// Coerces a numeric or nullish value to `i64`.
    ///
    /// # Errors
    ///
    /// Returns a conversion error (code 16004) for other types.
    #[allow(clippy::cast_possible_truncation)]
    pub fn coerce_to_long(&self) -> CodecResult<i64> {
        match self {
            Self::Int(n) => Ok(i64::from(*n)),
            Self::Long(n) => Ok(*n),
            Self::Double(d) => Ok(*d as i64),
            Self::Undefined | Self::Null => Ok(0),
            other => Err(conversion_error(16004, other, "long")),
        }
    }

    /// Coerces a numeric or nullish value to `f64`.
    ///
    /// # Errors
    ///
    /// Returns a conversion error (code 16005) for other types.
    #[allow(clippy::cast_precision_loss)]
    pub fn coerce_to_double(&self) -> CodecResult<f64> {
        match self {
            Self::Int(n) => Ok(f64::from(*n)),
            Self::Long(n) => Ok(*n as f64),
            Self::Double(d) => Ok(*d),
            Self::Undefined | Self::Null => Ok(0.0),
            other => Err(conversion_error(16005, other, "double")),
        }
    }

    /// Returns the milliseconds of a date value.
    ///
    /// # Errors
    ///
    /// Returns a conversion error (code 16006) for non-dates.
    pub fn coerce_to_date(&self) -> CodecResult<i64> {
        match self {
            Self::Date(millis) => Ok(*millis),
            other => Err(conversion_error(16006, other, "date")),
        }
    }

    /// Coerces a scalar to its string form. Nullish values become `""`.
    ///
    /// # Errors
    ///
    /// Returns a conversion error (code 16007) for arrays, documents and booleans.
    pub fn coerce_to_string(&self) -> CodecResult<String> {
        match self {
            Self::Undefined | Self::Null => Ok(String::new()),
            Self::String(s) => Ok(s.clone()),
            Self::Int(n) => Ok(n.to_string()),
            Self::Long(n) => Ok(n.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::Date(millis) => Ok(format_date(*millis)),
            other => Err(conversion_error(16007, other, "string")),
        }
    }

    /// Total order over values.
    ///
    /// Values of different types order by type rank (undefined, null,
    /// numbers, strings, documents, arrays, booleans, dates); numbers of
    /// different types compare by value; NaN sorts before every other
    /// number and equals itself.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let left = self.value_type().canonical_rank();
        let right = other.value_type().canonical_rank();
        if left != right {
            return left.cmp(&right);
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => compare_seq(a, b),
            (Self::Document(a), Self::Document(b)) => a.compare(b),
            (a, b) if a.is_numeric() => compare_numbers(a, b),
            _ => Ordering::Equal,
        }
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.compare(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[allow(clippy::cast_precision_loss)]
fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    let integral = |v: &Value| match v {
        Value::Int(n) => Some(i64::from(*n)),
        Value::Long(n) => Some(*n),
        _ => None,
    };
    if let (Some(x), Some(y)) = (integral(a), integral(b)) {
        return x.cmp(&y);
    }

    let as_f64 = |v: &Value| match v {
        Value::Int(n) => f64::from(*n),
        Value::Long(n) => *n as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    };
    let (x, y) = (as_f64(a), as_f64(b));
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn conversion_error(code: u32, value: &Value, target: &str) -> CodecError {
    CodecError::conversion(
        code,
        format!(
            "can't convert from type {} to {target}",
            value.value_type().name()
        ),
    )
}

/// Formats epoch milliseconds as an ISO-8601 UTC timestamp.
#[must_use]
pub fn format_date(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis).map_or_else(
        || millis.to_string(),
        |dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    )
}

/// A [`Value`] ordered by [`Value::compare`], for use as a map key.
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Long(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(Value::Int(2).compare(&Value::Long(2)), Ordering::Equal);
        assert_eq!(Value::Int(2).compare(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(
            Value::Long(i64::MAX).compare(&Value::Long(i64::MAX - 1)),
            Ordering::Greater
        );
        assert_eq!(Value::Double(f64::NAN).compare(&Value::Int(-5)), Ordering::Less);
        assert_eq!(
            Value::Double(f64::NAN).compare(&Value::Double(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn type_rank_orders_mixed_values() {
        let mut values = vec![
            Value::Date(0),
            Value::Bool(false),
            Value::Array(vec![]),
            Value::Document(Document::new()),
            Value::from("a"),
            Value::Int(7),
            Value::Null,
            Value::Undefined,
        ];
        values.sort_by(Value::compare);
        let types: Vec<ValueType> = values.iter().map(Value::value_type).collect();
        assert_eq!(
            types,
            vec![
                ValueType::Undefined,
                ValueType::Null,
                ValueType::Int,
                ValueType::String,
                ValueType::Document,
                ValueType::Array,
                ValueType::Bool,
                ValueType::Date,
            ]
        );
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Value::Array(vec![Value::Int(1)]);
        let long = Value::Array(vec![Value::Int(1), Value::Int(0)]);
        let bigger = Value::Array(vec![Value::Int(2)]);
        assert_eq!(short.compare(&long), Ordering::Less);
        assert_eq!(long.compare(&bigger), Ordering::Less);
    }

    #[test]
    fn int_or_long_picks_narrowest() {
        assert_eq!(Value::int_or_long(5), Value::Int(5));
        assert_eq!(
            Value::int_or_long(i64::from(i32::MAX) + 1),
            Value::Long(i64::from(i32::MAX) + 1)
        );
    }

    #[test]
    fn bool_coercion() {
        assert!(!Value::Undefined.coerce_to_bool());
        assert!(!Value::Null.coerce_to_bool());
        assert!(!Value::Double(0.0).coerce_to_bool());
        assert!(Value::from("").coerce_to_bool());
        assert!(Value::Array(vec![]).coerce_to_bool());
    }

    #[test]
    fn failed_coercions_carry_codes() {
        let err = Value::from("x").coerce_to_double().unwrap_err();
        assert_eq!(err.code(), Some(16005));
        let err = Value::Int(1).coerce_to_date().unwrap_err();
        assert_eq!(err.code(), Some(16006));
        let err = Value::Bool(true).coerce_to_string().unwrap_err();
        assert_eq!(err.code(), Some(16007));
        assert_eq!(Value::Null.coerce_to_long().unwrap(), 0);
    }

    #[test]
    fn dates_format_as_iso() {
        assert_eq!(format_date(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            Value::Date(86_400_000 + 1).coerce_to_string().unwrap(),
            "1970-01-02T00:00:00.001Z"
        );
    }

    #[test]
    fn ordered_value_treats_equal_numbers_as_one_key() {
        use std::collections::BTreeSet;
        let set: BTreeSet<OrderedValue> = [Value::Int(1), Value::Long(1), Value::Double(1.0)]
            .into_iter()
            .map(OrderedValue)
            .collect();
        assert_eq!(set.len(), 1);
    }
}
