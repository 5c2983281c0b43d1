//! `$project`: reshape each document.

use super::{attach, dispose_upstream, stage_document, upstream};
use super::{DocumentSource, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::expression::{parse_object, Expression, ObjectCtx, ObjectExpression};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;

/// Applies an object expression to every input document.
#[derive(Debug)]
pub struct ProjectSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    projection: ObjectExpression,
}

impl ProjectSource {
    /// Stage name.
    pub const NAME: &'static str = "$project";

    /// Parses `{$project: {...}}`.
    ///
    /// # Errors
    ///
    /// Code 15969 if the argument is not an object, or any object
    /// expression parse error.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let Some(spec) = spec.as_document() else {
            return Err(CoreError::user(15969, "$project specification must be an object"));
        };
        let projection = match parse_object(spec, ObjectCtx::PROJECTION)? {
            Expression::Object(object) => object,
            other => {
                return Err(CoreError::fatal(format!(
                    "projection parsed to a non-object expression: {other:?}"
                )))
            }
        };
        Ok(Box::new(Self {
            ctx: ctx.clone(),
            state: StageState::default(),
            source: None,
            projection,
        }))
    }
}

impl DocumentSource for ProjectSource {
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
        match upstream(Self::NAME, &mut self.source)?.next_document()? {
            Some(doc) => Ok(Some(self.projection.project(&doc)?)),
            None => Ok(None),
        }
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn optimize(&mut self) -> CoreResult<()> {
        self.projection = std::mem::take(&mut self.projection).optimize()?;
        Ok(())
    }

    fn dispose(&mut self) {
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        stage_document(Self::NAME, self.projection.serialize(true))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::ArraySource;

    #[test]
    fn projects_each_document() {
        let ctx = ExpressionContext::detached();
        let spec = Value::from_json_str(r#"{"_id": 0, "total": {"$add": ["$a", "$b"]}}"#).unwrap();
        let mut stage = ProjectSource::parse(&spec, &ctx).unwrap();
        stage.optimize().unwrap();
        let docs = vec![
            Document::from_json_str(r#"{"_id": 1, "a": 1, "b": 2}"#).unwrap(),
            Document::from_json_str(r#"{"_id": 2, "a": 5}"#).unwrap(),
        ];
        stage.set_source(Box::new(ArraySource::new(docs, ctx))).unwrap();

        let first = stage.next_document().unwrap().unwrap();
        assert_eq!(first.to_string(), r#"{"total":3}"#);
        let second = stage.next_document().unwrap().unwrap();
        assert_eq!(second.to_string(), r#"{"total":5}"#);
        assert!(stage.next_document().unwrap().is_none());
    }

    #[test]
    fn rejects_non_objects_and_top_level_operators() {
        let ctx = ExpressionContext::detached();
        assert_eq!(ProjectSource::parse(&Value::Int(1), &ctx).unwrap_err().code(), Some(15969));
        let spec = Value::from_json_str(r#"{"$add": [1, 2]}"#).unwrap();
        assert_eq!(ProjectSource::parse(&spec, &ctx).unwrap_err().code(), Some(16404));
    }

    #[test]
    fn constants_serialize_unambiguously() {
        let ctx = ExpressionContext::detached();
        let spec = Value::from_json_str(r#"{"a": true, "k": {"$const": 1}}"#).unwrap();
        let stage = ProjectSource::parse(&spec, &ctx).unwrap();
        assert_eq!(
            stage.serialize(false).to_string(),
            r#"{"$project":{"a":true,"k":{"$const":1}}}"#
        );
    }
}
