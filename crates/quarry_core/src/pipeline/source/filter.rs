//! `$match`: keep the documents satisfying a query.
//!
//! The query is compiled once, at parse time, into a [`Clause`] tree.
//! Comparisons only hold between values of the same canonical type, except
//! that `null` also matches a missing field. A clause on an array field
//! holds if it holds for the whole array or for any of its elements.

use super::{attach, dispose_upstream, stage_document, upstream};
use super::{DocumentSource, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::expression::{CompareOp, FieldPath};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value, ValueType};
use std::any::Any;
use std::cmp::Ordering;

/// One node of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `path <op> operand`; `$ne` compiles to a negated equality.
    Compare {
        /// Dotted field path.
        path: FieldPath,
        /// Comparison, never `$ne` or `$cmp`.
        op: CompareOp,
        /// Right-hand side.
        operand: Value,
    },
    /// `path $in [candidates]`.
    In {
        /// Dotted field path.
        path: FieldPath,
        /// Accepted values.
        candidates: Vec<Value>,
    },
    /// `path $exists true`.
    Exists {
        /// Dotted field path.
        path: FieldPath,
    },
    /// All clauses hold.
    And(Vec<Clause>),
    /// Any clause holds.
    Or(Vec<Clause>),
    /// The clause does not hold.
    Not(Box<Clause>),
}

impl Clause {
    /// Returns true if `doc` satisfies the clause.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Compare { path, op, operand } => {
                matches_path(doc, path.segments(), &|value: &Value| compare_single(value, *op, operand))
            }
            Self::In { path, candidates } => matches_path(doc, path.segments(), &|value: &Value| {
                candidates
                    .iter()
                    .any(|candidate| compare_single(value, CompareOp::Eq, candidate))
            }),
            Self::Exists { path } => matches_path(doc, path.segments(), &|value: &Value| !value.is_undefined()),
            Self::And(clauses) => clauses.iter().all(|clause| clause.matches(doc)),
            Self::Or(clauses) => clauses.iter().any(|clause| clause.matches(doc)),
            Self::Not(clause) => !clause.matches(doc),
        }
    }
}

/// Canonical type brackets; every numeric type shares one. Missing and
/// `null` are distinct brackets that still compare equal to each other.
fn bracket(value: &Value) -> ValueType {
    match value.value_type() {
        ValueType::Long | ValueType::Double => ValueType::Int,
        other => other,
    }
}

fn compare_single(value: &Value, op: CompareOp, operand: &Value) -> bool {
    let (left, right) = (bracket(value), bracket(operand));
    if left != right {
        let nullish = |t: ValueType| matches!(t, ValueType::Undefined | ValueType::Null);
        return nullish(left) && nullish(right) && matches!(op, CompareOp::Eq | CompareOp::Lte | CompareOp::Gte);
    }
    if matches!(operand, Value::Array(_)) && op != CompareOp::Eq {
        return false;
    }
    let order = value.compare(operand);
    match op {
        CompareOp::Eq => order == Ordering::Equal,
        CompareOp::Gt => order == Ordering::Greater,
        CompareOp::Gte => order != Ordering::Less,
        CompareOp::Lt => order == Ordering::Less,
        CompareOp::Lte => order != Ordering::Greater,
        CompareOp::Ne => order != Ordering::Equal,
        CompareOp::Cmp => false,
    }
}

/// Applies `single` along `path`, expanding arrays met on the way.
///
/// A missing field is offered to `single` as [`Value::Undefined`]. An array
/// at the end of the path matches if any element or the array itself
/// does. An array in the middle matches if the rest of the path matches
/// inside any element, or a numeric segment names a matching element.
fn matches_path(doc: &Document, path: &[String], single: &dyn Fn(&Value) -> bool) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    match doc.get(head) {
        Some(value) => matches_at(value, rest, single),
        None => single(&Value::Undefined),
    }
}

fn matches_at(value: &Value, rest: &[String], single: &dyn Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) if rest.is_empty() => items.iter().any(single) || single(value),
        Value::Array(items) => {
            let index = rest[0].parse::<usize>().ok();
            items.iter().enumerate().any(|(n, item)| {
                let nested = match item {
                    Value::Document(inner) => matches_path(inner, rest, single),
                    _ => false,
                };
                nested || (index == Some(n) && matches_at(item, &rest[1..], single))
            })
        }
        _ if rest.is_empty() => single(value),
        Value::Document(inner) => matches_path(inner, rest, single),
        _ => single(&Value::Undefined),
    }
}

/// Filters its input with a query.
#[derive(Debug)]
pub struct MatchSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    query: Document,
    clause: Clause,
}

impl MatchSource {
    /// Stage name.
    pub const NAME: &'static str = "$match";

    /// Parses `{$match: {query}}`.
    ///
    /// # Errors
    ///
    /// Code 15959 if the argument is not an object, 10068 for an
    /// unsupported query operator, 14816 for a malformed `$and` / `$or`.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let Some(query) = spec.as_document() else {
            return Err(CoreError::user(15959, "the match filter must be an expression in an object"));
        };
        Ok(Box::new(Self {
            ctx: ctx.clone(),
            state: StageState::default(),
            source: None,
            clause: compile_query(query)?,
            query: query.clone(),
        }))
    }

    /// Returns the compiled query.
    #[must_use]
    pub fn clause(&self) -> &Clause {
        &self.clause
    }
}

impl DocumentSource for MatchSource {
    fn source_name(&self) -> &'static str {
        Self::NAME
    }

    fn context(&self) -> &ExpressionContext {
        &self.ctx
    }

    fn state(&mut self) -> &mut StageState {
        &mut self.state
    }

    fn fetch(&mut self) -> CoreResult<Option<Document>> {
        loop {
            let Some(doc) = upstream(Self::NAME, &mut self.source)?.next_document()? else {
                return Ok(None);
            };
            if self.clause.matches(&doc) {
                return Ok(Some(doc));
            }
        }
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn dispose(&mut self) {
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        stage_document(Self::NAME, self.query.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compiles a query document into a conjunction of its clauses.
fn compile_query(query: &Document) -> CoreResult<Clause> {
    let mut clauses = Vec::with_capacity(query.len());
    for (name, value) in query.iter() {
        match name {
            "$and" => clauses.push(Clause::And(compile_list(name, value)?)),
            "$or" => clauses.push(Clause::Or(compile_list(name, value)?)),
            "$nor" => clauses.push(Clause::Not(Box::new(Clause::Or(compile_list(name, value)?)))),
            operator if operator.starts_with('$') => {
                return Err(CoreError::user(10068, format!("invalid operator: {operator}")));
            }
            path => compile_field(path, value, &mut clauses)?,
        }
    }
    Ok(Clause::And(clauses))
}

fn compile_list(name: &str, value: &Value) -> CoreResult<Vec<Clause>> {
    let malformed = || CoreError::user(14816, format!("{name} expression must be a nonempty array of objects"));
    let items = value.as_array().filter(|items| !items.is_empty()).ok_or_else(malformed)?;
    items
        .iter()
        .map(|item| item.as_document().ok_or_else(malformed).and_then(compile_query))
        .collect()
}

fn compile_field(name: &str, value: &Value, clauses: &mut Vec<Clause>) -> CoreResult<()> {
    let path = FieldPath::parse(name)?;
    let compare = |op: CompareOp, operand: &Value| Clause::Compare {
        path: path.clone(),
        op,
        operand: operand.clone(),
    };

    let operators = match value {
        Value::Document(doc) if doc.first().is_some_and(|(name, _)| name.starts_with('$')) => doc,
        literal => {
            clauses.push(compare(CompareOp::Eq, literal));
            return Ok(());
        }
    };

    for (name, operand) in operators.iter() {
        let clause = match name {
            "$eq" => compare(CompareOp::Eq, operand),
            "$ne" => Clause::Not(Box::new(compare(CompareOp::Eq, operand))),
            "$gt" => compare(CompareOp::Gt, operand),
            "$gte" => compare(CompareOp::Gte, operand),
            "$lt" => compare(CompareOp::Lt, operand),
            "$lte" => compare(CompareOp::Lte, operand),
            "$in" | "$nin" => {
                let Some(candidates) = operand.as_array() else {
                    return Err(CoreError::user(15881, format!("{name} needs an array")));
                };
                let any = Clause::In {
                    path: path.clone(),
                    candidates: candidates.to_vec(),
                };
                if name == "$in" {
                    any
                } else {
                    Clause::Not(Box::new(any))
                }
            }
            "$exists" => {
                let present = Clause::Exists { path: path.clone() };
                if operand.coerce_to_bool() {
                    present
                } else {
                    Clause::Not(Box::new(present))
                }
            }
            other => return Err(CoreError::user(10068, format!("invalid operator: {other}"))),
        };
        clauses.push(clause);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::ArraySource;

    fn matching(query: &str, docs: &[&str]) -> Vec<String> {
        let ctx = ExpressionContext::detached();
        let mut stage = MatchSource::parse(&Value::from_json_str(query).unwrap(), &ctx).unwrap();
        stage.optimize().unwrap();
        let docs = docs.iter().map(|d| Document::from_json_str(d).unwrap()).collect();
        stage.set_source(Box::new(ArraySource::new(docs, ctx))).unwrap();
        let mut out = Vec::new();
        while let Some(doc) = stage.next_document().unwrap() {
            out.push(doc.to_string());
        }
        out
    }

    #[test]
    fn comparison_operators() {
        let docs = [r#"{"a":1}"#, r#"{"a":5}"#, r#"{"a":9}"#, r#"{"b":1}"#];
        assert_eq!(matching(r#"{"a": {"$gt": 2}}"#, &docs), vec![r#"{"a":5}"#, r#"{"a":9}"#]);
        assert_eq!(matching(r#"{"a": {"$gte": 2, "$lt": 9}}"#, &docs), vec![r#"{"a":5}"#]);
        assert_eq!(matching(r#"{"a": 9}"#, &docs), vec![r#"{"a":9}"#]);
        assert_eq!(matching(r#"{"a": {"$in": [1, 9]}}"#, &docs), vec![r#"{"a":1}"#, r#"{"a":9}"#]);
        assert_eq!(matching(r#"{"a": {"$exists": false}}"#, &docs), vec![r#"{"b":1}"#]);
        assert_eq!(
            matching(r#"{"$or": [{"a": 1}, {"b": 1}]}"#, &docs),
            vec![r#"{"a":1}"#, r#"{"b":1}"#]
        );
        assert_eq!(matching(r#"{"$nor": [{"a": 1}, {"b": 1}]}"#, &docs), vec![r#"{"a":5}"#, r#"{"a":9}"#]);
        assert_eq!(matching(r#"{}"#, &docs).len(), 4);
    }

    #[test]
    fn range_never_matches_a_missing_field() {
        let docs = [r#"{"b":1}"#, r#"{"a":null}"#, r#"{"a":3}"#];
        assert_eq!(matching(r#"{"a": {"$lt": 5}}"#, &docs), vec![r#"{"a":3}"#]);
        assert_eq!(matching(r#"{"a": {"$gt": 0, "$lt": 5}}"#, &docs), vec![r#"{"a":3}"#]);
        assert_eq!(matching(r#"{"a": {"$ne": 3}}"#, &docs), vec![r#"{"b":1}"#, r#"{"a":null}"#]);
    }

    #[test]
    fn null_matches_missing_fields() {
        let docs = [r#"{"b":1}"#, r#"{"a":null}"#, r#"{"a":0}"#];
        assert_eq!(matching(r#"{"a": null}"#, &docs), vec![r#"{"b":1}"#, r#"{"a":null}"#]);
        assert_eq!(matching(r#"{"a": {"$gte": null}}"#, &docs).len(), 2);
        assert_eq!(matching(r#"{"a": {"$in": [null]}}"#, &docs).len(), 2);
        assert_eq!(matching(r#"{"a": {"$ne": null}}"#, &docs), vec![r#"{"a":0}"#]);
    }

    #[test]
    fn comparisons_stay_within_a_type() {
        let docs = [r#"{"a":"x"}"#, r#"{"a":true}"#, r#"{"a":2.5}"#, r#"{"a":[]}"#];
        assert_eq!(matching(r#"{"a": {"$gt": 1}}"#, &docs), vec![r#"{"a":2.5}"#]);
        assert_eq!(matching(r#"{"a": {"$lt": "z"}}"#, &docs), vec![r#"{"a":"x"}"#]);
    }

    #[test]
    fn array_fields_match_their_elements() {
        let docs = [r#"{"tags":["x","y"]}"#, r#"{"tags":"x"}"#, r#"{"tags":["z"]}"#];
        assert_eq!(matching(r#"{"tags": "x"}"#, &docs), vec![docs[0], docs[1]]);
        assert_eq!(matching(r#"{"tags": ["z"]}"#, &docs), vec![docs[2]]);
        assert_eq!(matching(r#"{"tags": {"$in": ["y", "z"]}}"#, &docs), vec![docs[0], docs[2]]);
        assert_eq!(matching(r#"{"tags": {"$nin": ["x"]}}"#, &docs), vec![docs[2]]);

        let scores = [r#"{"s":[1,8]}"#, r#"{"s":[4]}"#];
        assert_eq!(matching(r#"{"s": {"$gt": 5}}"#, &scores), vec![scores[0]]);
        assert_eq!(matching(r#"{"s": {"$gt": 3, "$lt": 5}}"#, &scores), vec![scores[0], scores[1]]);
    }

    #[test]
    fn dotted_paths_walk_arrays() {
        let docs = [
            r#"{"items":[{"sku":"a","n":1},{"sku":"b","n":7}]}"#,
            r#"{"items":[{"sku":"c"}]}"#,
            r#"{"items":{"sku":"a"}}"#,
            r#"{"items":3}"#,
        ];
        assert_eq!(matching(r#"{"items.sku": "a"}"#, &docs), vec![docs[0], docs[2]]);
        assert_eq!(matching(r#"{"items.n": {"$gte": 5}}"#, &docs), vec![docs[0]]);
        assert_eq!(matching(r#"{"items.1.sku": "b"}"#, &docs), vec![docs[0]]);
        assert_eq!(matching(r#"{"items.sku": {"$exists": false}}"#, &docs), vec![docs[3]]);
    }

    #[test]
    fn serializes_the_original_query() {
        let ctx = ExpressionContext::detached();
        let spec = Value::from_json_str(r#"{"a": {"$gt": 2}}"#).unwrap();
        let mut stage = MatchSource::parse(&spec, &ctx).unwrap();
        stage.optimize().unwrap();
        assert_eq!(stage.serialize(false).to_string(), r#"{"$match":{"a":{"$gt":2}}}"#);
        assert_eq!(stage.serialize(true).to_string(), r#"{"$match":{"a":{"$gt":2}}}"#);
    }

    #[test]
    fn parse_errors() {
        let ctx = ExpressionContext::detached();
        let code = |json: &str| {
            MatchSource::parse(&Value::from_json_str(json).unwrap(), &ctx)
                .unwrap_err()
                .code()
        };
        assert_eq!(code("1"), Some(15959));
        assert_eq!(code(r#"{"$where": "x"}"#), Some(10068));
        assert_eq!(code(r#"{"a": {"$regex": "x"}}"#), Some(10068));
        assert_eq!(code(r#"{"$or": []}"#), Some(14816));
        assert_eq!(code(r#"{"a": {"$in": 3}}"#), Some(15881));
    }
}
