//! In-memory input: documents produced by an earlier pipeline run.

use super::{DocumentSource, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;
use std::collections::VecDeque;

/// Yields a fixed list of documents.
#[derive(Debug)]
pub struct ArraySource {
    ctx: ExpressionContext,
    state: StageState,
    documents: VecDeque<Document>,
    total: usize,
}

impl ArraySource {
    /// Creates a source over `documents`.
    #[must_use]
    pub fn new(documents: Vec<Document>, ctx: ExpressionContext) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            total: documents.len(),
            documents: documents.into(),
        }
    }

    /// Creates a source over an array value whose elements are documents.
    ///
    /// # Errors
    ///
    /// Code 16999 if `value` is not an array of documents.
    pub fn from_value(value: &Value, ctx: ExpressionContext) -> CoreResult<Self> {
        let not_documents = || CoreError::user(16999, "an array source must be an array of documents");
        let items = value.as_array().ok_or_else(not_documents)?;
        let documents = items
            .iter()
            .map(|item| item.as_document().cloned().ok_or_else(not_documents))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self::new(documents, ctx))
    }
}

impl DocumentSource for ArraySource {
    fn source_name(&self) -> &'static str {
        "$array"
    }

    fn context(&self) -> &ExpressionContext {
        &self.ctx
    }

    fn state(&mut self) -> &mut StageState {
        &mut self.state
    }

    fn fetch(&mut self) -> CoreResult<Option<Document>> {
        Ok(self.documents.pop_front())
    }

    fn dispose(&mut self) {
        self.documents.clear();
    }

    fn serialize(&self, _explain: bool) -> Document {
        let count = i64::try_from(self.total).unwrap_or(i64::MAX);
        Document::new().with("$array", Document::new().with("count", Value::int_or_long(count)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_requires_documents() {
        let ctx = ExpressionContext::detached();
        let good = Value::from_json_str(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        let mut source = ArraySource::from_value(&good, ctx.clone()).unwrap();
        assert_eq!(source.serialize(true).to_string(), r#"{"$array":{"count":2}}"#);
        assert!(source.next_document().unwrap().is_some());

        let bad = Value::from_json_str(r#"[{"a": 1}, 2]"#).unwrap();
        assert_eq!(ArraySource::from_value(&bad, ctx).unwrap_err().code(), Some(16999));
    }
}
