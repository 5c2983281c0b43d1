//! Document-building expressions, as used by `$project`.

use super::field_path::FieldPath;
use super::Expression;
use crate::error::{CoreError, CoreResult};
use quarry_codec::{Document, Value};

/// Builds an output document field by field.
///
/// A field is either an inclusion (`None`), copying the input field, or a
/// computed expression. Nested objects apply to sub-documents and map over
/// arrays of sub-documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectExpression {
    exclude_id: bool,
    fields: Vec<(String, Option<Expression>)>,
}

impl ObjectExpression {
    /// Creates an empty object expression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the root `_id` is excluded.
    #[must_use]
    pub fn excludes_id(&self) -> bool {
        self.exclude_id
    }

    /// Excludes the root `_id` from the output.
    pub fn exclude_id(&mut self) {
        self.exclude_id = true;
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Option<Expression>)] {
        &self.fields
    }

    /// Returns true if nothing is included or computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Adds an inclusion of the dotted `path`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_field`].
    pub fn include_path(&mut self, path: &str) -> CoreResult<()> {
        self.add_field(path, None)
    }

    /// Adds a field at the dotted `path`. `None` includes the input field.
    ///
    /// # Errors
    ///
    /// Code 16400 if the field already has an expression that cannot be
    /// merged, 16401 if a subfield is added below a computed field.
    pub fn add_field(&mut self, path: &str, expression: Option<Expression>) -> CoreResult<()> {
        let path = FieldPath::parse(path)?;
        self.add_segments(path.segments(), expression)
    }

    fn add_segments(&mut self, segments: &[String], expression: Option<Expression>) -> CoreResult<()> {
        let (head, tail) = match segments.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        let existing = self.fields.iter().position(|(name, _)| name == head);

        let Some(index) = existing else {
            let value = if tail.is_empty() {
                expression
            } else {
                let mut nested = Self::new();
                nested.add_segments(tail, expression)?;
                Some(Expression::Object(nested))
            };
            self.fields.push((head.clone(), value));
            return Ok(());
        };

        let slot = &mut self.fields[index].1;
        if tail.is_empty() {
            // { 'b.c': 1, b: { a: 1 } } merges into one sub-object.
            match (slot, expression) {
                (Some(Expression::Object(current)), Some(Expression::Object(added))) => {
                    for (name, value) in added.fields {
                        current.add_segments(std::slice::from_ref(&name), value)?;
                    }
                    Ok(())
                }
                _ => Err(CoreError::user(
                    16400,
                    format!("can't add an expression for field {head} because there is already an expression for that field or one of its sub-fields"),
                )),
            }
        } else {
            match slot {
                Some(Expression::Object(current)) => current.add_segments(tail, expression),
                _ => Err(CoreError::user(
                    16401,
                    format!("can't add an expression for a subfield of {head} because there is already an expression that applies to the whole field"),
                )),
            }
        }
    }

    /// Optimizes every computed field.
    ///
    /// # Errors
    ///
    /// Fails if constant folding fails.
    pub fn optimize(self) -> CoreResult<Self> {
        let fields = self
            .fields
            .into_iter()
            .map(|(name, expression)| Ok((name, expression.map(Expression::optimize).transpose()?)))
            .collect::<CoreResult<_>>()?;
        Ok(Self {
            exclude_id: self.exclude_id,
            fields,
        })
    }

    /// Evaluates as an operand: computed fields only, against `root`.
    ///
    /// # Errors
    ///
    /// Fails if a field expression fails.
    pub fn evaluate_document(&self, root: &Document) -> CoreResult<Document> {
        self.add_to_document(&Document::new(), root, false)
    }

    /// Projects `root`, keeping its `_id` unless excluded.
    ///
    /// # Errors
    ///
    /// Fails if a field expression fails.
    pub fn project(&self, root: &Document) -> CoreResult<Document> {
        self.add_to_document(root, root, true)
    }

    fn add_to_document(&self, current: &Document, root: &Document, at_root: bool) -> CoreResult<Document> {
        let mut result = Document::with_capacity(self.fields.len() + usize::from(!self.exclude_id));
        let mut done = vec![false; self.fields.len()];

        for (name, value) in current.iter() {
            let Some(index) = self.fields.iter().position(|(field, _)| field == name) else {
                if at_root && !self.exclude_id && name == "_id" {
                    result.insert(name, value.clone());
                }
                continue;
            };
            done[index] = true;

            match (&self.fields[index].1, value) {
                (None, _) => {
                    result.insert(name, value.clone());
                }
                (Some(Expression::Object(nested)), Value::Document(inner)) => {
                    result.insert(name, nested.add_to_document(inner, root, false)?);
                }
                (Some(Expression::Object(nested)), Value::Array(items)) => {
                    let mut mapped = Vec::with_capacity(items.len());
                    for item in items {
                        if let Value::Document(inner) = item {
                            mapped.push(Value::Document(nested.add_to_document(inner, root, false)?));
                        }
                    }
                    result.insert(name, mapped);
                }
                (Some(expression), _) => {
                    if let Some(computed) = computed(expression, root)? {
                        result.insert(name, computed);
                    }
                }
            }
        }

        for ((name, expression), done) in self.fields.iter().zip(done) {
            if done {
                continue;
            }
            if let Some(expression) = expression {
                if let Some(computed) = computed(expression, root)? {
                    result.insert(name.as_str(), computed);
                }
            }
        }
        Ok(result)
    }

    /// Serializes back to the declarative form.
    #[must_use]
    pub fn serialize(&self, require_expression: bool) -> Document {
        let mut doc = Document::with_capacity(self.fields.len() + 1);
        if self.exclude_id {
            doc.insert("_id", false);
        }
        for (name, expression) in &self.fields {
            let value = match expression {
                None => Value::Bool(true),
                Some(expression) => expression.serialize(require_expression),
            };
            doc.insert(name.as_str(), value);
        }
        doc
    }
}

/// Evaluates a computed field; missing values and empty sub-objects are
/// left out of the output.
fn computed(expression: &Expression, root: &Document) -> CoreResult<Option<Value>> {
    let value = expression.evaluate(root)?;
    let empty_object = matches!(expression, Expression::Object(_))
        && matches!(&value, Value::Document(doc) if doc.is_empty());
    if value.is_undefined() || empty_object {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::expression::{parse_object, ObjectCtx};

    fn projection(json: &str) -> ObjectExpression {
        let spec = Document::from_json_str(json).unwrap();
        match parse_object(&spec, ObjectCtx::PROJECTION).unwrap() {
            Expression::Object(object) => object,
            other => panic!("not an object: {other:?}"),
        }
    }

    fn doc(json: &str) -> Document {
        Document::from_json_str(json).unwrap()
    }

    #[test]
    fn inclusion_keeps_id_first_order_of_input() {
        let object = projection(r#"{"b": 1, "a": 1}"#);
        let out = object.project(&doc(r#"{"_id": 1, "a": 2, "b": 3, "c": 4}"#)).unwrap();
        assert_eq!(out.to_string(), r#"{"_id":1,"a":2,"b":3}"#);
    }

    #[test]
    fn id_can_be_excluded() {
        let object = projection(r#"{"_id": 0, "a": 1}"#);
        assert!(object.excludes_id());
        let out = object.project(&doc(r#"{"_id": 1, "a": 2}"#)).unwrap();
        assert_eq!(out.to_string(), r#"{"a":2}"#);
    }

    #[test]
    fn computed_fields_skip_missing() {
        let object = projection(r#"{"x": "$a", "y": "$missing", "z": {"$add": ["$a", 1]}}"#);
        let out = object.project(&doc(r#"{"_id": 7, "a": 2}"#)).unwrap();
        assert_eq!(out.to_string(), r#"{"_id":7,"x":2,"z":3}"#);
    }

    #[test]
    fn nested_objects_map_arrays() {
        let object = projection(r#"{"a.b": 1}"#);
        let out = object
            .project(&doc(r#"{"_id": 1, "a": [{"b": 1, "c": 2}, 5, {"c": 3}]}"#))
            .unwrap();
        assert_eq!(out.to_string(), r#"{"_id":1,"a":[{"b":1},{}]}"#);
    }

    #[test]
    fn dotted_and_nested_specs_merge() {
        let object = projection(r#"{"b.c": 1, "b": {"a": 1}}"#);
        let out = object.project(&doc(r#"{"_id": 1, "b": {"a": 1, "c": 2, "d": 3}}"#)).unwrap();
        assert_eq!(out.to_string(), r#"{"_id":1,"b":{"a":1,"c":2}}"#);
    }

    #[test]
    fn conflicting_fields_are_rejected() {
        let mut object = ObjectExpression::new();
        object.add_field("a", Some(Expression::Constant(Value::Int(1)))).unwrap();
        let err = object.add_field("a", Some(Expression::Constant(Value::Int(2)))).unwrap_err();
        assert_eq!(err.code(), Some(16400));
        let err = object.add_field("a.b", None).unwrap_err();
        assert_eq!(err.code(), Some(16401));
    }

    #[test]
    fn serializes_inclusions_and_exclusion() {
        let object = projection(r#"{"_id": false, "a": true, "b": {"$const": 5}}"#);
        assert_eq!(
            object.serialize(true).to_string(),
            r#"{"_id":false,"a":true,"b":{"$const":5}}"#
        );
    }
}
