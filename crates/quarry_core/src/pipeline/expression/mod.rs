//! The expression language evaluated by pipeline stages.
//!
//! An expression is an owned tree. It is parsed from its declarative form
//! ([`parse_object`], [`parse_expression`], [`parse_operand`]), simplified
//! once by [`Expression::optimize`] and then evaluated per document.
//!
//! ## Optimization
//!
//! Children are optimized first. A subtree whose operands are all
//! constants is evaluated once and replaced by its value. Commutative
//! operators (`$add`, `$multiply`, `$and`, `$or`) are flattened and their
//! constants folded into a single trailing constant, so
//! `add(add(a, 1), add(2, b))` becomes `add(a, b, 3)`. A comparison of a
//! field with a constant becomes a [`FieldRange`], and ranges on the same
//! field inside one `$and` are intersected.

mod field_path;
mod field_range;
mod object;
mod ops;

pub use field_path::FieldPath;
pub use field_range::{FieldRange, Range};
pub use object::ObjectExpression;
pub use ops::{Arity, CompareOp, Op};

use crate::error::{CoreError, CoreResult};
use quarry_codec::{Document, Value};

/// Where an object is being parsed, and what it may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectCtx {
    /// A plain document (not an operator) is allowed.
    pub document_ok: bool,
    /// The object is the top level of a projection.
    pub top_level: bool,
    /// Field inclusions (`a: 1`) are allowed.
    pub inclusion_ok: bool,
}

impl ObjectCtx {
    /// The top level of `$project`.
    pub const PROJECTION: Self = Self {
        document_ok: true,
        top_level: true,
        inclusion_ok: true,
    };

    /// An object inside an operator.
    pub const DOCUMENT: Self = Self {
        document_ok: true,
        top_level: false,
        inclusion_ok: false,
    };

    fn nested(self) -> Self {
        Self {
            top_level: false,
            ..self
        }
    }
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value.
    Constant(Value),
    /// A reference to a field of the input document.
    FieldPath(FieldPath),
    /// An operator applied to operands.
    Operator {
        /// The operator.
        op: Op,
        /// Its operands, in order.
        operands: Vec<Expression>,
    },
    /// A document built from field expressions.
    Object(ObjectExpression),
    /// An interval test on one field, produced by the optimizer.
    FieldRange(FieldRange),
    /// Coerces the child's value to a boolean.
    CoerceToBool(Box<Expression>),
}

/// Parses an object in expression position.
///
/// The object is either an operator (a single `$`-prefixed field) or a
/// document whose fields are inclusions, field references, nested objects
/// or operators.
///
/// # Errors
///
/// User errors 15983, 16404, 15990, 16405, 16420, 16406, 15992 and 15982
/// for malformed objects, plus any operator parse error.
pub fn parse_object(spec: &Document, ctx: ObjectCtx) -> CoreResult<Expression> {
    let mut operator: Option<Expression> = None;
    let mut object: Option<ObjectExpression> = None;

    for (index, (name, value)) in spec.iter().enumerate() {
        if name.starts_with('$') {
            if index != 0 {
                return Err(CoreError::user(
                    15983,
                    format!("the operator must be the only field in a pipeline object (at '{name}')"),
                ));
            }
            if ctx.top_level {
                return Err(CoreError::user(
                    16404,
                    "$expressions are not allowed at the top-level of $project",
                ));
            }
            operator = Some(parse_expression(name, value)?);
            continue;
        }

        if operator.is_some() {
            return Err(CoreError::user(
                15990,
                format!("this object is already an operator expression, and can't be used as a document expression (at '{name}')"),
            ));
        }
        if !ctx.top_level && name.contains('.') {
            return Err(CoreError::user(
                16405,
                "dotted field names are only allowed at the top level",
            ));
        }
        if !ctx.document_ok {
            return Err(CoreError::user(
                15990,
                format!("a document expression is not allowed here (at '{name}')"),
            ));
        }
        let target = object.get_or_insert_with(ObjectExpression::new);

        match value {
            Value::Document(nested) => {
                target.add_field(name, Some(parse_object(nested, ctx.nested())?))?;
            }
            Value::String(reference) => {
                let Some(path) = reference.strip_prefix('$') else {
                    return Err(CoreError::user(
                        15982,
                        format!("field path references must be prefixed with a '$' ('{reference}')"),
                    ));
                };
                target.add_field(name, Some(Expression::FieldPath(FieldPath::parse(path)?)))?;
            }
            Value::Bool(_) | Value::Int(_) | Value::Long(_) | Value::Double(_) => {
                if value.coerce_to_bool() {
                    if !ctx.inclusion_ok {
                        return Err(CoreError::user(
                            16420,
                            "field inclusion is not allowed inside of $expressions",
                        ));
                    }
                    target.include_path(name)?;
                } else {
                    if !(ctx.top_level && name == "_id") {
                        return Err(CoreError::user(
                            16406,
                            "The top-level _id field is the only field currently supported for exclusion",
                        ));
                    }
                    target.exclude_id();
                }
            }
            other => {
                return Err(CoreError::user(
                    15992,
                    format!("disallowed field type {} in object expression (at '{name}')", other.value_type()),
                ))
            }
        }
    }

    Ok(operator.unwrap_or_else(|| Expression::Object(object.unwrap_or_default())))
}

/// Parses the operator `name` applied to `arguments`.
///
/// # Errors
///
/// Code 15999 for an unknown operator; 16019, 16020 and 16022 for a wrong
/// operand count; 16021 for an object operand.
pub fn parse_expression(name: &str, arguments: &Value) -> CoreResult<Expression> {
    if name == "$const" {
        return Ok(Expression::Constant(arguments.clone()));
    }
    let Some((op, arity)) = Op::lookup(name) else {
        return Err(CoreError::user(15999, format!("invalid operator '{name}'")));
    };

    if let Arity::Fixed(count) = arity {
        if count > 1 && !matches!(arguments, Value::Array(_)) {
            return Err(CoreError::user(
                16019,
                format!("the {name} operator requires an array of {count} operands"),
            ));
        }
    }

    let operands = match arguments {
        Value::Document(_) => {
            return Err(CoreError::user(
                16021,
                format!("the {name} operator does not accept an object as an operand"),
            ))
        }
        Value::Array(items) => {
            if let Arity::Fixed(count) = arity {
                if count != items.len() {
                    return Err(CoreError::user(
                        16020,
                        format!("the {name} operator requires {count} operand(s)"),
                    ));
                }
            }
            items.iter().map(parse_operand).collect::<CoreResult<Vec<_>>>()?
        }
        single => {
            if matches!(arity, Arity::Fixed(count) if count != 1) {
                return Err(CoreError::user(
                    16022,
                    format!("the {name} operator requires an array of operands"),
                ));
            }
            vec![parse_operand(single)?]
        }
    };
    Ok(Expression::Operator { op, operands })
}

/// Parses an operand: a `$` field reference, a nested object, or a constant.
///
/// # Errors
///
/// Fails if a field path or nested object is malformed.
pub fn parse_operand(value: &Value) -> CoreResult<Expression> {
    match value {
        Value::String(s) if s.starts_with('$') => Ok(Expression::FieldPath(FieldPath::parse(&s[1..])?)),
        Value::Document(doc) => parse_object(doc, ObjectCtx::DOCUMENT),
        other => Ok(Expression::Constant(other.clone())),
    }
}

impl Expression {
    /// Creates a field reference from a dotted path.
    ///
    /// # Errors
    ///
    /// Fails if the path is malformed.
    pub fn field(path: &str) -> CoreResult<Self> {
        Ok(Self::FieldPath(FieldPath::parse(path)?))
    }

    /// Creates an operator node.
    #[must_use]
    pub fn operator(op: Op, operands: Vec<Expression>) -> Self {
        Self::Operator { op, operands }
    }

    /// Returns true for a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns true if the node always yields a boolean.
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        match self {
            Self::Constant(value) => matches!(value, Value::Bool(_)),
            Self::FieldRange(_) | Self::CoerceToBool(_) => true,
            Self::Operator { op, .. } => op.is_boolean(),
            Self::FieldPath(_) | Self::Object(_) => false,
        }
    }

    /// Evaluates the expression against `doc`.
    ///
    /// # Errors
    ///
    /// User errors raised by operators, such as unsupported operand types.
    pub fn evaluate(&self, doc: &Document) -> CoreResult<Value> {
        match self {
            Self::Constant(value) => Ok(value.clone()),
            Self::FieldPath(path) => path.evaluate(doc),
            Self::Object(object) => Ok(Value::Document(object.evaluate_document(doc)?)),
            Self::FieldRange(range) => range.evaluate(doc),
            Self::CoerceToBool(inner) => Ok(Value::Bool(inner.evaluate(doc)?.coerce_to_bool())),
            Self::Operator { op, operands } => evaluate_operator(*op, operands, doc),
        }
    }

    /// Simplifies the tree. Optimizing an optimized tree changes nothing.
    ///
    /// # Errors
    ///
    /// Fails if evaluating a constant subtree fails.
    pub fn optimize(self) -> CoreResult<Self> {
        match self {
            Self::Operator { op, operands } => optimize_operator(op, operands),
            Self::Object(object) => Ok(Self::Object(object.optimize()?)),
            Self::CoerceToBool(inner) => Ok(match inner.optimize()? {
                Self::Constant(value) => Self::Constant(Value::Bool(value.coerce_to_bool())),
                boolean if boolean.is_boolean() => boolean,
                other => Self::CoerceToBool(Box::new(other)),
            }),
            leaf => Ok(leaf),
        }
    }

    /// Serializes back to the declarative form.
    ///
    /// With `require_expression`, constants are wrapped in `$const` so the
    /// value cannot be mistaken for an inclusion flag.
    #[must_use]
    pub fn serialize(&self, require_expression: bool) -> Value {
        match self {
            Self::Constant(value) => {
                let ambiguous = match value {
                    Value::String(s) => s.starts_with('$'),
                    Value::Document(_) => true,
                    _ => false,
                };
                if require_expression || ambiguous {
                    Value::Document(Document::new().with("$const", value.clone()))
                } else {
                    value.clone()
                }
            }
            Self::FieldPath(path) => Value::String(path.to_reference()),
            Self::Operator { op, operands } => {
                let operands: Vec<Value> = operands.iter().map(|e| e.serialize(false)).collect();
                Value::Document(Document::new().with(op.name(), operands))
            }
            Self::Object(object) => Value::Document(object.serialize(require_expression)),
            Self::FieldRange(range) => range.serialize(),
            Self::CoerceToBool(inner) => Value::Document(
                Document::new().with("$and", vec![inner.serialize(false)]),
            ),
        }
    }
}

/// Adds values with the `$add` widening rules.
pub(crate) fn sum_values(values: &[Value]) -> CoreResult<Value> {
    ops::apply(Op::Add, values)
}

fn evaluate_operator(op: Op, operands: &[Expression], doc: &Document) -> CoreResult<Value> {
    match op {
        Op::And => {
            for operand in operands {
                if !operand.evaluate(doc)?.coerce_to_bool() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Op::Or => {
            for operand in operands {
                if operand.evaluate(doc)?.coerce_to_bool() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Op::Cond => {
            let [condition, then, otherwise] = operands else {
                return Err(arity_error(op, operands.len()));
            };
            if condition.evaluate(doc)?.coerce_to_bool() {
                then.evaluate(doc)
            } else {
                otherwise.evaluate(doc)
            }
        }
        Op::IfNull => {
            let [value, replacement] = operands else {
                return Err(arity_error(op, operands.len()));
            };
            let value = value.evaluate(doc)?;
            if value.is_nullish() {
                replacement.evaluate(doc)
            } else {
                Ok(value)
            }
        }
        strict => {
            if let Some((_, Arity::Fixed(count))) = Op::lookup(strict.name()) {
                if count != operands.len() {
                    return Err(arity_error(strict, operands.len()));
                }
            }
            let args = operands
                .iter()
                .map(|operand| operand.evaluate(doc))
                .collect::<CoreResult<Vec<_>>>()?;
            ops::apply(strict, &args)
        }
    }
}

fn arity_error(op: Op, found: usize) -> CoreError {
    CoreError::fatal(format!("{} built with {found} operands", op.name()))
}

fn optimize_operator(op: Op, operands: Vec<Expression>) -> CoreResult<Expression> {
    let mut operands = operands
        .into_iter()
        .map(Expression::optimize)
        .collect::<CoreResult<Vec<_>>>()?;

    if operands.iter().all(Expression::is_constant) {
        let value = evaluate_operator(op, &operands, &Document::new())?;
        return Ok(Expression::Constant(value));
    }

    if let Op::Compare(compare) = op {
        return Ok(field_range(compare, operands));
    }

    if op.is_commutative() {
        operands = fold_constants(op, operands)?;
    }

    match op {
        Op::And => {
            let operands = merge_ranges(operands);
            if operands
                .iter()
                .any(|e| matches!(e, Expression::FieldRange(r) if r.is_impossible()))
            {
                return Ok(Expression::Constant(Value::Bool(false)));
            }
            Ok(collapse_logical(op, operands, false))
        }
        Op::Or => Ok(collapse_logical(op, operands, true)),
        _ => Ok(Expression::Operator { op, operands }),
    }
}

/// Rewrites `field <op> constant` (either order) as a field range.
fn field_range(compare: CompareOp, operands: Vec<Expression>) -> Expression {
    if matches!(compare, CompareOp::Ne | CompareOp::Cmp) {
        return Expression::Operator {
            op: Op::Compare(compare),
            operands,
        };
    }
    match <[Expression; 2]>::try_from(operands) {
        Ok([Expression::FieldPath(path), Expression::Constant(bound)]) => Expression::FieldRange(
            FieldRange::new(path, Range::from_comparison(compare, bound)),
        ),
        Ok([Expression::Constant(bound), Expression::FieldPath(path)]) => Expression::FieldRange(
            FieldRange::new(path, Range::from_comparison(compare.reverse(), bound)),
        ),
        Ok(pair) => Expression::Operator {
            op: Op::Compare(compare),
            operands: pair.into(),
        },
        Err(operands) => Expression::Operator {
            op: Op::Compare(compare),
            operands,
        },
    }
}

/// Flattens nested uses of `op` and folds two or more constants into one
/// trailing constant. A lone constant is moved to the end as is. String
/// constants disable folding.
fn fold_constants(op: Op, operands: Vec<Expression>) -> CoreResult<Vec<Expression>> {
    let mut flat = Vec::with_capacity(operands.len());
    for operand in operands {
        match operand {
            Expression::Operator { op: inner, operands } if inner == op => flat.extend(operands),
            other => flat.push(other),
        }
    }
    if flat
        .iter()
        .any(|e| matches!(e, Expression::Constant(Value::String(_))))
    {
        return Ok(flat);
    }

    let (mut constants, mut rest): (Vec<_>, Vec<_>) = flat.into_iter().partition(Expression::is_constant);
    if constants.len() > 1 {
        let folded = evaluate_operator(op, &constants, &Document::new())?;
        rest.push(Expression::Constant(folded));
    } else {
        rest.append(&mut constants);
    }
    Ok(rest)
}

/// Intersects field ranges on the same path.
fn merge_ranges(operands: Vec<Expression>) -> Vec<Expression> {
    let mut merged: Vec<Expression> = Vec::with_capacity(operands.len());
    for operand in operands {
        if let Expression::FieldRange(range) = &operand {
            let same_path = merged.iter_mut().find_map(|e| match e {
                Expression::FieldRange(existing) if existing.path() == range.path() => Some(existing),
                _ => None,
            });
            if let Some(existing) = same_path {
                existing.intersect(range);
                continue;
            }
        }
        merged.push(operand);
    }
    merged
}

/// Applies the trailing constant of `$and` / `$or` and unwraps a single
/// remaining operand. `decisive` is the constant value that decides the
/// whole result.
fn collapse_logical(op: Op, mut operands: Vec<Expression>, decisive: bool) -> Expression {
    if let Some(Expression::Constant(value)) = operands.last() {
        if value.coerce_to_bool() == decisive {
            return Expression::Constant(Value::Bool(decisive));
        }
        operands.pop();
    }
    match operands.len() {
        0 => Expression::Constant(Value::Bool(!decisive)),
        1 => {
            let only = operands.remove(0);
            if only.is_boolean() {
                only
            } else {
                Expression::CoerceToBool(Box::new(only))
            }
        }
        _ => Expression::Operator { op, operands },
    }
}
