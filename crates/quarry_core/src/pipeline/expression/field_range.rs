//! Interval predicates on a single field.

use super::field_path::FieldPath;
use super::ops::CompareOp;
use crate::error::CoreResult;
use quarry_codec::{Document, Value};
use std::cmp::Ordering;

/// An interval with optional, possibly open, bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    /// Lower bound; `None` is unbounded.
    pub bottom: Option<Value>,
    /// True if `bottom` itself is excluded.
    pub bottom_open: bool,
    /// Upper bound; `None` is unbounded.
    pub top: Option<Value>,
    /// True if `top` itself is excluded.
    pub top_open: bool,
}

impl Range {
    /// The range matching `value <op> bound`. `$ne` and `$cmp` have none.
    #[must_use]
    pub fn from_comparison(op: CompareOp, bound: Value) -> Option<Self> {
        let (bottom, bottom_open, top, top_open) = match op {
            CompareOp::Eq => (Some(bound.clone()), false, Some(bound), false),
            CompareOp::Gt => (Some(bound), true, None, false),
            CompareOp::Gte => (Some(bound), false, None, false),
            CompareOp::Lt => (None, false, Some(bound), true),
            CompareOp::Lte => (None, false, Some(bound), false),
            CompareOp::Ne | CompareOp::Cmp => return None,
        };
        Some(Self {
            bottom,
            bottom_open,
            top,
            top_open,
        })
    }

    /// Returns true if `value` lies inside the range.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        if let Some(bottom) = &self.bottom {
            match value.compare(bottom) {
                Ordering::Less => return false,
                Ordering::Equal if self.bottom_open => return false,
                _ => {}
            }
        }
        if let Some(top) = &self.top {
            match value.compare(top) {
                Ordering::Greater => return false,
                Ordering::Equal if self.top_open => return false,
                _ => {}
            }
        }
        true
    }

    /// Intersects two ranges; `None` when they are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let (bottom, bottom_open) = match (&self.bottom, &other.bottom) {
            (None, None) => (None, false),
            (Some(b), None) => (Some(b.clone()), self.bottom_open),
            (None, Some(b)) => (Some(b.clone()), other.bottom_open),
            (Some(a), Some(b)) => match a.compare(b) {
                Ordering::Greater => (Some(a.clone()), self.bottom_open),
                Ordering::Less => (Some(b.clone()), other.bottom_open),
                Ordering::Equal => (Some(a.clone()), self.bottom_open || other.bottom_open),
            },
        };
        let (top, top_open) = match (&self.top, &other.top) {
            (None, None) => (None, false),
            (Some(t), None) => (Some(t.clone()), self.top_open),
            (None, Some(t)) => (Some(t.clone()), other.top_open),
            (Some(a), Some(b)) => match a.compare(b) {
                Ordering::Less => (Some(a.clone()), self.top_open),
                Ordering::Greater => (Some(b.clone()), other.top_open),
                Ordering::Equal => (Some(a.clone()), self.top_open || other.top_open),
            },
        };

        if let (Some(b), Some(t)) = (&bottom, &top) {
            match b.compare(t) {
                Ordering::Greater => return None,
                Ordering::Equal if bottom_open || top_open => return None,
                _ => {}
            }
        }
        Some(Self {
            bottom,
            bottom_open,
            top,
            top_open,
        })
    }

    fn is_point(&self) -> bool {
        match (&self.bottom, &self.top) {
            (Some(b), Some(t)) => {
                !self.bottom_open && !self.top_open && b.compare(t) == Ordering::Equal
            }
            _ => false,
        }
    }
}

/// A range constraint on one field path. A `None` range never matches.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRange {
    path: FieldPath,
    range: Option<Range>,
}

impl FieldRange {
    /// Creates a field range.
    #[must_use]
    pub fn new(path: FieldPath, range: Option<Range>) -> Self {
        Self { path, range }
    }

    /// Returns the constrained path.
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Returns the interval, or `None` if the range is impossible.
    #[must_use]
    pub fn range(&self) -> Option<&Range> {
        self.range.as_ref()
    }

    /// Returns true if no value can match.
    #[must_use]
    pub fn is_impossible(&self) -> bool {
        self.range.is_none()
    }

    /// Narrows this range by `other`, which must constrain the same path.
    pub fn intersect(&mut self, other: &Self) {
        debug_assert_eq!(self.path, other.path);
        self.range = match (&self.range, &other.range) {
            (Some(a), Some(b)) => a.intersect(b),
            _ => None,
        };
    }

    /// Evaluates the predicate against `doc`. A missing field evaluates as
    /// undefined, which orders below every other value.
    ///
    /// # Errors
    ///
    /// Fails if the path cannot be evaluated.
    pub fn evaluate(&self, doc: &Document) -> CoreResult<Value> {
        let Some(range) = &self.range else {
            return Ok(Value::Bool(false));
        };
        let value = self.path.evaluate(doc)?;
        Ok(Value::Bool(range.contains(&value)))
    }

    /// Serializes as the equivalent comparison expression.
    #[must_use]
    pub fn serialize(&self) -> Value {
        let Some(range) = &self.range else {
            return Value::Bool(false);
        };
        let path = Value::String(self.path.to_reference());
        let compare = |op: &str, bound: &Value| {
            Value::Document(Document::new().with(op, vec![path.clone(), bound.clone()]))
        };

        if range.is_point() {
            if let Some(bound) = &range.bottom {
                return compare("$eq", bound);
            }
        }
        let mut clauses = Vec::new();
        if let Some(bottom) = &range.bottom {
            clauses.push(compare(if range.bottom_open { "$gt" } else { "$gte" }, bottom));
        }
        if let Some(top) = &range.top {
            clauses.push(compare(if range.top_open { "$lt" } else { "$lte" }, top));
        }
        match clauses.len() {
            0 => Value::Bool(true),
            1 => clauses.remove(0),
            _ => Value::Document(Document::new().with("$and", clauses)),
        }
    }
}
