//! Operator table and the semantics of strict operators.
//!
//! Strict operators evaluate every operand before running. `$and`, `$or`,
//! `$cond` and `$ifNull` short-circuit and are evaluated by the expression
//! tree itself.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Datelike, Timelike, Utc};
use quarry_codec::{NumericType, Value};
use std::cmp::Ordering;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$cmp`, returning -1, 0 or 1.
    Cmp,
}

struct CompareEntry {
    /// Truth value for a comparison result of -1, 0 and 1.
    truth: [bool; 3],
    /// The operator with its operands swapped.
    reverse: CompareOp,
    name: &'static str,
}

const COMPARE_TABLE: [CompareEntry; 7] = [
    CompareEntry { truth: [false, true, false], reverse: CompareOp::Eq, name: "$eq" },
    CompareEntry { truth: [true, false, true], reverse: CompareOp::Ne, name: "$ne" },
    CompareEntry { truth: [false, false, true], reverse: CompareOp::Lt, name: "$gt" },
    CompareEntry { truth: [false, true, true], reverse: CompareOp::Lte, name: "$gte" },
    CompareEntry { truth: [true, false, false], reverse: CompareOp::Gt, name: "$lt" },
    CompareEntry { truth: [true, true, false], reverse: CompareOp::Gte, name: "$lte" },
    CompareEntry { truth: [false, false, false], reverse: CompareOp::Cmp, name: "$cmp" },
];

impl CompareOp {
    fn entry(self) -> &'static CompareEntry {
        &COMPARE_TABLE[self as usize]
    }

    /// Returns the operator name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Returns the operator that gives the same result with swapped operands.
    #[must_use]
    pub fn reverse(self) -> Self {
        self.entry().reverse
    }

    /// Compares `left` with `right`.
    #[must_use]
    pub fn apply(self, left: &Value, right: &Value) -> Value {
        let ordering = left.compare(right);
        if self == Self::Cmp {
            return Value::Int(ordering as i32);
        }
        let index = match ordering {
            Ordering::Less => 0,
            Ordering::Equal => 1,
            Ordering::Greater => 2,
        };
        Value::Bool(self.entry().truth[index])
    }
}

/// An expression operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    Add,
    And,
    Compare(CompareOp),
    Cond,
    DayOfMonth,
    DayOfWeek,
    DayOfYear,
    Divide,
    Hour,
    IfNull,
    Minute,
    Mod,
    Month,
    Multiply,
    Not,
    Or,
    Second,
    Strcasecmp,
    Substr,
    Subtract,
    ToLower,
    ToUpper,
    Week,
    Year,
}

/// How many operands an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Any number.
    Variadic,
    /// Exactly this many.
    Fixed(usize),
}

use Arity::{Fixed, Variadic};

/// Operators by name, sorted for binary search.
const OP_TABLE: &[(&str, Op, Arity)] = &[
    ("$add", Op::Add, Variadic),
    ("$and", Op::And, Variadic),
    ("$cmp", Op::Compare(CompareOp::Cmp), Fixed(2)),
    ("$cond", Op::Cond, Fixed(3)),
    ("$dayOfMonth", Op::DayOfMonth, Fixed(1)),
    ("$dayOfWeek", Op::DayOfWeek, Fixed(1)),
    ("$dayOfYear", Op::DayOfYear, Fixed(1)),
    ("$divide", Op::Divide, Fixed(2)),
    ("$eq", Op::Compare(CompareOp::Eq), Fixed(2)),
    ("$gt", Op::Compare(CompareOp::Gt), Fixed(2)),
    ("$gte", Op::Compare(CompareOp::Gte), Fixed(2)),
    ("$hour", Op::Hour, Fixed(1)),
    ("$ifNull", Op::IfNull, Fixed(2)),
    ("$lt", Op::Compare(CompareOp::Lt), Fixed(2)),
    ("$lte", Op::Compare(CompareOp::Lte), Fixed(2)),
    ("$minute", Op::Minute, Fixed(1)),
    ("$mod", Op::Mod, Fixed(2)),
    ("$month", Op::Month, Fixed(1)),
    ("$multiply", Op::Multiply, Variadic),
    ("$ne", Op::Compare(CompareOp::Ne), Fixed(2)),
    ("$not", Op::Not, Fixed(1)),
    ("$or", Op::Or, Variadic),
    ("$second", Op::Second, Fixed(1)),
    ("$strcasecmp", Op::Strcasecmp, Fixed(2)),
    ("$substr", Op::Substr, Fixed(3)),
    ("$subtract", Op::Subtract, Fixed(2)),
    ("$toLower", Op::ToLower, Fixed(1)),
    ("$toUpper", Op::ToUpper, Fixed(1)),
    ("$week", Op::Week, Fixed(1)),
    ("$year", Op::Year, Fixed(1)),
];

impl Op {
    /// Finds an operator by name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<(Self, Arity)> {
        OP_TABLE
            .binary_search_by(|(candidate, _, _)| (*candidate).cmp(name))
            .ok()
            .map(|i| (OP_TABLE[i].1, OP_TABLE[i].2))
    }

    /// Returns the operator name.
    #[must_use]
    pub fn name(self) -> &'static str {
        if let Self::Compare(op) = self {
            return op.name();
        }
        OP_TABLE
            .iter()
            .find(|(_, op, _)| *op == self)
            .map_or("$unknown", |(name, _, _)| name)
    }

    /// True for operators whose operands may be reordered and regrouped.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::And | Self::Or | Self::Multiply)
    }

    /// True for operators that always produce a boolean.
    #[must_use]
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            Self::And
                | Self::Or
                | Self::Not
                | Self::Compare(
                    CompareOp::Eq
                        | CompareOp::Ne
                        | CompareOp::Gt
                        | CompareOp::Gte
                        | CompareOp::Lt
                        | CompareOp::Lte
                )
        )
    }
}

/// Applies a strict operator to evaluated operands.
///
/// # Errors
///
/// User errors for unsupported operand types.
pub(super) fn apply(op: Op, args: &[Value]) -> CoreResult<Value> {
    match op {
        Op::Add => add(args),
        Op::Multiply => multiply(args),
        Op::Subtract => subtract(&args[0], &args[1]),
        Op::Divide => divide(&args[0], &args[1]),
        Op::Mod => modulo(&args[0], &args[1]),
        Op::Compare(cmp) => Ok(cmp.apply(&args[0], &args[1])),
        Op::Not => Ok(Value::Bool(!args[0].coerce_to_bool())),
        Op::Strcasecmp => strcasecmp(&args[0], &args[1]),
        Op::Substr => substr(&args[0], &args[1], &args[2]),
        Op::ToLower => Ok(Value::String(args[0].coerce_to_string()?.to_ascii_lowercase())),
        Op::ToUpper => Ok(Value::String(args[0].coerce_to_string()?.to_ascii_uppercase())),
        Op::DayOfMonth
        | Op::DayOfWeek
        | Op::DayOfYear
        | Op::Hour
        | Op::Minute
        | Op::Month
        | Op::Second
        | Op::Week
        | Op::Year => date_part(op, &args[0]),
        Op::And | Op::Or | Op::Cond | Op::IfNull => Err(CoreError::fatal(format!(
            "{} is not a strict operator",
            op.name()
        ))),
    }
}

/// Result type of arithmetic over `args`; `Int` when all are nullish.
fn widest(args: &[&Value]) -> NumericType {
    args.iter()
        .filter_map(|v| v.numeric_type())
        .fold(NumericType::Int, NumericType::widest)
}

fn reject(value: &Value, code: u32, op: &str, kind: &str) -> CoreResult<()> {
    let rejected = match kind {
        "dates" => matches!(value, Value::Date(_)),
        _ => matches!(value, Value::String(_)),
    };
    if rejected {
        Err(CoreError::user(code, format!("{op} does not support {kind}")))
    } else {
        Ok(())
    }
}

fn narrowest(kind: NumericType, long: i64, double: f64) -> Value {
    match kind {
        NumericType::Double => Value::Double(double),
        NumericType::Long => Value::Long(long),
        NumericType::Int => Value::int_or_long(long),
    }
}

fn add(args: &[Value]) -> CoreResult<Value> {
    let mut long_total: i64 = 0;
    let mut double_total = 0.0;
    for value in args {
        reject(value, 16415, "$add", "dates")?;
        reject(value, 16416, "$add", "strings")?;
        long_total = long_total.wrapping_add(value.coerce_to_long()?);
        double_total += value.coerce_to_double()?;
    }
    let refs: Vec<&Value> = args.iter().collect();
    Ok(narrowest(widest(&refs), long_total, double_total))
}

fn multiply(args: &[Value]) -> CoreResult<Value> {
    let mut long_product: i64 = 1;
    let mut double_product = 1.0;
    for value in args {
        reject(value, 16375, "$multiply", "dates")?;
        long_product = long_product.wrapping_mul(value.coerce_to_long()?);
        double_product *= value.coerce_to_double()?;
    }
    let refs: Vec<&Value> = args.iter().collect();
    Ok(narrowest(widest(&refs), long_product, double_product))
}

fn subtract(left: &Value, right: &Value) -> CoreResult<Value> {
    reject(left, 16376, "$subtract", "dates")?;
    reject(right, 16376, "$subtract", "dates")?;
    let kind = widest(&[left, right]);
    if kind == NumericType::Double {
        return Ok(Value::Double(left.coerce_to_double()? - right.coerce_to_double()?));
    }
    let difference = left.coerce_to_long()?.wrapping_sub(right.coerce_to_long()?);
    Ok(narrowest(kind, difference, 0.0))
}

fn divide(left: &Value, right: &Value) -> CoreResult<Value> {
    reject(left, 16373, "$divide", "dates")?;
    reject(right, 16373, "$divide", "dates")?;
    let divisor = right.coerce_to_double()?;
    if divisor == 0.0 {
        return Ok(Value::Undefined);
    }
    Ok(Value::Double(left.coerce_to_double()? / divisor))
}

fn modulo(left: &Value, right: &Value) -> CoreResult<Value> {
    reject(left, 16374, "$mod", "dates")?;
    reject(right, 16374, "$mod", "dates")?;
    if left.is_nullish() {
        return Ok(left.clone());
    }
    if right.is_nullish() {
        return Ok(right.clone());
    }
    let divisor = right.coerce_to_double()?;
    if divisor == 0.0 {
        return Ok(Value::Undefined);
    }

    let fractional_divisor = matches!(right, Value::Double(_)) && f64::from(right.coerce_to_int()?) != divisor;
    if matches!(left, Value::Double(_)) || fractional_divisor {
        return Ok(Value::Double(left.coerce_to_double()? % divisor));
    }
    if matches!(left, Value::Long(_)) || matches!(right, Value::Long(_)) {
        return Ok(Value::Long(left.coerce_to_long()?.wrapping_rem(right.coerce_to_long()?)));
    }
    let divisor = right.coerce_to_int()?;
    if divisor == 0 {
        return Ok(Value::Undefined);
    }
    Ok(Value::Int(left.coerce_to_int()?.wrapping_rem(divisor)))
}

fn strcasecmp(left: &Value, right: &Value) -> CoreResult<Value> {
    let left = left.coerce_to_string()?.to_ascii_uppercase();
    let right = right.coerce_to_string()?.to_ascii_uppercase();
    Ok(Value::Int(left.cmp(&right) as i32))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn substr(string: &Value, start: &Value, length: &Value) -> CoreResult<Value> {
    let string = string.coerce_to_string()?;
    if !start.is_numeric() {
        return Err(CoreError::user(
            16034,
            format!("$substr: starting index must be a numeric type (is {})", start.value_type()),
        ));
    }
    if !length.is_numeric() {
        return Err(CoreError::user(
            16035,
            format!("$substr: length must be a numeric type (is {})", length.value_type()),
        ));
    }
    let bytes = string.as_bytes();
    let start = start.coerce_to_long()? as usize;
    if start >= bytes.len() {
        return Ok(Value::String(String::new()));
    }
    let length = length.coerce_to_long()? as usize;
    let end = start.saturating_add(length).min(bytes.len());
    Ok(Value::String(String::from_utf8_lossy(&bytes[start..end]).into_owned()))
}

fn date_part(op: Op, value: &Value) -> CoreResult<Value> {
    let millis = value.coerce_to_date()?;
    let date: DateTime<Utc> = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        CoreError::user(16006, format!("date {millis} is out of range"))
    })?;
    let from_sunday = date.weekday().num_days_from_sunday();
    let part = match op {
        Op::DayOfMonth => date.day(),
        Op::DayOfWeek => from_sunday + 1,
        Op::DayOfYear => date.ordinal(),
        Op::Hour => date.hour(),
        Op::Minute => date.minute(),
        Op::Month => date.month(),
        Op::Second => date.second(),
        Op::Week => (date.ordinal0() + 7 - from_sunday) / 7,
        _ => return Ok(Value::Int(date.year())),
    };
    Ok(Value::Int(i32::try_from(part).unwrap_or(i32::MAX)))
}
