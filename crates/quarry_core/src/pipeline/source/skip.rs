//! `$skip`: drop the first N documents.

use super::{attach, dispose_upstream, numeric_argument, stage_document, upstream};
use super::{DocumentSource, StageSplit, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;

/// Discards a prefix of its input, once, on the first pull.
#[derive(Debug)]
pub struct SkipSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    skip: i64,
    skipped: bool,
}

impl SkipSource {
    /// Stage name.
    pub const NAME: &'static str = "$skip";

    /// Creates a skip stage.
    #[must_use]
    pub fn new(skip: i64, ctx: ExpressionContext) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            source: None,
            skip,
            skipped: false,
        }
    }

    /// Parses `{$skip: n}`.
    ///
    /// # Errors
    ///
    /// Code 15972 if `n` is not a number, 15956 if it is negative.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let skip = numeric_argument(spec, 15972, "the value to skip must be a number")?;
        if skip < 0 {
            return Err(CoreError::user(15956, "the number to skip cannot be negative"));
        }
        Ok(Box::new(Self::new(skip, ctx.clone())))
    }

    /// Returns the number of documents skipped.
    #[must_use]
    pub fn skip(&self) -> i64 {
        self.skip
    }
}

impl DocumentSource for SkipSource {
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
        let source = upstream(Self::NAME, &mut self.source)?;
        if !self.skipped {
            self.skipped = true;
            for _ in 0..self.skip {
                if source.next_document()?.is_none() {
                    return Ok(None);
                }
            }
        }
        source.next_document()
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn coalesce(&mut self, next: &dyn DocumentSource) -> bool {
        match next.as_any().downcast_ref::<Self>() {
            Some(other) => {
                self.skip = self.skip.saturating_add(other.skip);
                true
            }
            None => false,
        }
    }

    fn dispose(&mut self) {
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        stage_document(Self::NAME, Value::int_or_long(self.skip))
    }

    /// Skipping is only meaningful over the merged stream.
    fn split(&self) -> Option<StageSplit> {
        Some(StageSplit {
            shard: None,
            merge: Some(Box::new(Self::new(self.skip, self.ctx.clone()))),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::ArraySource;

    fn skip_over(skip: i64, n: i32) -> Vec<Value> {
        let docs = (0..n).map(|i| Document::new().with("n", i)).collect();
        let ctx = ExpressionContext::detached();
        let mut stage = SkipSource::new(skip, ctx.clone());
        stage.set_source(Box::new(ArraySource::new(docs, ctx))).unwrap();
        let mut out = Vec::new();
        while let Some(doc) = stage.next_document().unwrap() {
            out.push(doc.get("n").cloned().unwrap());
        }
        out
    }

    #[test]
    fn skips_prefix() {
        assert_eq!(skip_over(2, 4), vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(skip_over(0, 2).len(), 2);
        assert!(skip_over(5, 3).is_empty());
    }

    #[test]
    fn parse_errors() {
        let ctx = ExpressionContext::detached();
        assert_eq!(SkipSource::parse(&Value::Null, &ctx).unwrap_err().code(), Some(15972));
        assert_eq!(SkipSource::parse(&Value::Int(-1), &ctx).unwrap_err().code(), Some(15956));
        assert!(SkipSource::parse(&Value::Int(0), &ctx).is_ok());
    }

    #[test]
    fn coalesce_sums() {
        let ctx = ExpressionContext::detached();
        let mut first = SkipSource::new(3, ctx.clone());
        assert!(first.coalesce(&SkipSource::new(4, ctx.clone())));
        assert_eq!(first.serialize(false).to_string(), r#"{"$skip":7}"#);
    }

    #[test]
    fn splits_to_merge_side_only() {
        let split = SkipSource::new(3, ExpressionContext::detached()).split().unwrap();
        assert!(split.shard.is_none());
        assert_eq!(split.merge.unwrap().serialize(false).to_string(), r#"{"$skip":3}"#);
    }
}
