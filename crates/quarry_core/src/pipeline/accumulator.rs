//! Group accumulators.
//!
//! An accumulator folds the values of one group into a single result. In
//! merge mode the inputs are partial results from another pipeline: array
//! accumulators then receive arrays and splice their elements instead of
//! nesting them.

use crate::error::{CoreError, CoreResult};
use crate::pipeline::expression::sum_values;
use quarry_codec::{OrderedValue, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Stateful reduction over the values of one group.
pub trait Accumulator: Send + fmt::Debug {
    /// Returns the operator name, such as `$min`.
    fn op_name(&self) -> &'static str;

    /// Folds one value into the state.
    ///
    /// # Errors
    ///
    /// Fails when a merge-mode input has the wrong shape.
    fn process(&mut self, value: &Value) -> CoreResult<()>;

    /// Returns the reduced value; `Undefined` when nothing was retained.
    fn value(&self) -> Value;
}

/// The accumulator operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorOp {
    /// `$addToSet`
    AddToSet,
    /// `$first`
    First,
    /// `$last`
    Last,
    /// `$max`
    Max,
    /// `$min`
    Min,
    /// `$push`
    Push,
    /// `$sum`
    Sum,
}

/// Sorted for binary search.
const ACCUMULATOR_TABLE: &[(&str, AccumulatorOp)] = &[
    ("$addToSet", AccumulatorOp::AddToSet),
    ("$first", AccumulatorOp::First),
    ("$last", AccumulatorOp::Last),
    ("$max", AccumulatorOp::Max),
    ("$min", AccumulatorOp::Min),
    ("$push", AccumulatorOp::Push),
    ("$sum", AccumulatorOp::Sum),
];

impl AccumulatorOp {
    /// Finds an accumulator by name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        ACCUMULATOR_TABLE
            .binary_search_by(|(candidate, _)| (*candidate).cmp(name))
            .ok()
            .map(|i| ACCUMULATOR_TABLE[i].1)
    }

    /// Returns the operator name.
    #[must_use]
    pub fn name(self) -> &'static str {
        ACCUMULATOR_TABLE
            .iter()
            .find(|(_, op)| *op == self)
            .map_or("$unknown", |(name, _)| name)
    }

    /// Creates a fresh accumulator.
    #[must_use]
    pub fn create(self, merging: bool) -> Box<dyn Accumulator> {
        match self {
            Self::Min => Box::new(MinMax::new(Ordering::Less)),
            Self::Max => Box::new(MinMax::new(Ordering::Greater)),
            Self::First => Box::new(First::default()),
            Self::Last => Box::new(Last::default()),
            Self::Sum => Box::new(Sum::default()),
            Self::Push => Box::new(Push {
                values: Vec::new(),
                merging,
            }),
            Self::AddToSet => Box::new(AddToSet {
                set: BTreeSet::new(),
                merging,
            }),
        }
    }
}

/// `$min` and `$max`. Nullish values never change the result.
#[derive(Debug)]
struct MinMax {
    keep: Ordering,
    current: Value,
}

impl MinMax {
    fn new(keep: Ordering) -> Self {
        Self {
            keep,
            current: Value::Undefined,
        }
    }
}

impl Accumulator for MinMax {
    fn op_name(&self) -> &'static str {
        if self.keep == Ordering::Less {
            "$min"
        } else {
            "$max"
        }
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        if value.is_nullish() {
            return Ok(());
        }
        if self.current.is_undefined() || value.compare(&self.current) == self.keep {
            self.current = value.clone();
        }
        Ok(())
    }

    fn value(&self) -> Value {
        self.current.clone()
    }
}

/// Latches the first value seen, even a missing one.
#[derive(Debug, Default)]
struct First {
    first: Option<Value>,
}

impl Accumulator for First {
    fn op_name(&self) -> &'static str {
        "$first"
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        if self.first.is_none() {
            self.first = Some(value.clone());
        }
        Ok(())
    }

    fn value(&self) -> Value {
        self.first.clone().unwrap_or(Value::Undefined)
    }
}

#[derive(Debug, Default)]
struct Last {
    last: Option<Value>,
}

impl Accumulator for Last {
    fn op_name(&self) -> &'static str {
        "$last"
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        self.last = Some(value.clone());
        Ok(())
    }

    fn value(&self) -> Value {
        self.last.clone().unwrap_or(Value::Undefined)
    }
}

/// Adds numeric values with `$add` widening; other values are ignored.
/// Partial sums merge by adding them, so merge mode needs no special case.
#[derive(Debug)]
struct Sum {
    total: Value,
}

impl Default for Sum {
    fn default() -> Self {
        Self {
            total: Value::Int(0),
        }
    }
}

impl Accumulator for Sum {
    fn op_name(&self) -> &'static str {
        "$sum"
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        if value.is_numeric() {
            self.total = sum_values(&[self.total.clone(), value.clone()])?;
        }
        Ok(())
    }

    fn value(&self) -> Value {
        self.total.clone()
    }
}

fn merge_input<'a>(op: &str, value: &'a Value) -> CoreResult<&'a [Value]> {
    value.as_array().ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "{op} in merge mode expects arrays of partial results, found {}",
            value.value_type()
        ))
    })
}

#[derive(Debug)]
struct Push {
    values: Vec<Value>,
    merging: bool,
}

impl Accumulator for Push {
    fn op_name(&self) -> &'static str {
        "$push"
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        if self.merging {
            self.values.extend_from_slice(merge_input("$push", value)?);
        } else if !value.is_undefined() {
            self.values.push(value.clone());
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::Array(self.values.clone())
    }
}

/// Distinct values in canonical order.
#[derive(Debug)]
struct AddToSet {
    set: BTreeSet<OrderedValue>,
    merging: bool,
}

impl Accumulator for AddToSet {
    fn op_name(&self) -> &'static str {
        "$addToSet"
    }

    fn process(&mut self, value: &Value) -> CoreResult<()> {
        if self.merging {
            let items = merge_input("$addToSet", value)?;
            self.set.extend(items.iter().cloned().map(OrderedValue));
        } else if !value.is_undefined() {
            self.set.insert(OrderedValue(value.clone()));
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::Array(self.set.iter().map(|v| v.0.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(op: AccumulatorOp, merging: bool, values: &[Value]) -> Value {
        let mut acc = op.create(merging);
        for value in values {
            acc.process(value).unwrap();
        }
        acc.value()
    }

    fn ints(values: &[i32]) -> Value {
        Value::Array(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn lookup_by_name() {
        for (name, op) in ACCUMULATOR_TABLE {
            assert_eq!(AccumulatorOp::lookup(name), Some(*op));
            assert_eq!(op.name(), *name);
            assert_eq!(op.create(false).op_name(), *name);
        }
        assert_eq!(AccumulatorOp::lookup("$avg"), None);
    }

    #[test]
    fn min_max_ignore_nullish() {
        let values = [Value::Null, Value::Int(4), Value::Undefined, Value::Int(-2), Value::Int(9)];
        assert_eq!(fold(AccumulatorOp::Min, false, &values), Value::Int(-2));
        assert_eq!(fold(AccumulatorOp::Max, false, &values), Value::Int(9));
        assert_eq!(fold(AccumulatorOp::Min, false, &[Value::Null]), Value::Undefined);
    }

    #[test]
    fn first_latches_missing() {
        let values = [Value::Undefined, Value::Int(1)];
        assert_eq!(fold(AccumulatorOp::First, false, &values), Value::Undefined);
        assert_eq!(fold(AccumulatorOp::First, false, &values[1..]), Value::Int(1));
        assert_eq!(fold(AccumulatorOp::Last, false, &values), Value::Int(1));
    }

    #[test]
    fn sum_widens_and_skips_non_numbers() {
        let values = [Value::Int(2), Value::from("x"), Value::Long(3)];
        assert_eq!(fold(AccumulatorOp::Sum, false, &values), Value::Long(5));
        let values = [Value::Int(2), Value::Double(0.5)];
        assert_eq!(fold(AccumulatorOp::Sum, false, &values), Value::Double(2.5));
        assert_eq!(fold(AccumulatorOp::Sum, false, &[]), Value::Int(0));
    }

    #[test]
    fn push_skips_missing() {
        let values = [Value::Int(1), Value::Undefined, Value::Null];
        assert_eq!(
            fold(AccumulatorOp::Push, false, &values),
            Value::Array(vec![Value::Int(1), Value::Null])
        );
    }

    #[test]
    fn merge_mode_splices_partial_arrays() {
        let partials = [ints(&[1, 2]), ints(&[3])];
        assert_eq!(fold(AccumulatorOp::Push, true, &partials), ints(&[1, 2, 3]));
        assert_eq!(
            fold(AccumulatorOp::Push, false, &partials),
            Value::Array(vec![ints(&[1, 2]), ints(&[3])])
        );

        let partials = [ints(&[3, 1]), ints(&[1, 2])];
        assert_eq!(fold(AccumulatorOp::AddToSet, true, &partials), ints(&[1, 2, 3]));

        let mut acc = AccumulatorOp::Push.create(true);
        assert!(matches!(
            acc.process(&Value::Int(1)),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn add_to_set_dedups_numerically() {
        let values = [Value::Int(1), Value::Long(1), Value::Double(1.0), Value::from("a")];
        assert_eq!(
            fold(AccumulatorOp::AddToSet, false, &values),
            Value::Array(vec![Value::Int(1), Value::from("a")])
        );
    }
}
