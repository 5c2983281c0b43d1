//! `$limit`: pass through at most N documents.

use super::{attach, dispose_upstream, numeric_argument, stage_document, upstream};
use super::{DocumentSource, StageSplit, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;

/// Stops after `limit` documents without reading further upstream.
#[derive(Debug)]
pub struct LimitSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    limit: i64,
    passed: i64,
}

impl LimitSource {
    /// Stage name.
    pub const NAME: &'static str = "$limit";

    /// Creates a limit stage.
    #[must_use]
    pub fn new(limit: i64, ctx: ExpressionContext) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            source: None,
            limit,
            passed: 0,
        }
    }

    /// Parses `{$limit: n}`.
    ///
    /// # Errors
    ///
    /// Code 15957 if `n` is not a number, 15958 if it is not positive.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let limit = numeric_argument(spec, 15957, "the limit must be specified as a number")?;
        if limit <= 0 {
            return Err(CoreError::user(15958, "the limit must be positive"));
        }
        Ok(Box::new(Self::new(limit, ctx.clone())))
    }

    /// Returns the limit.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit
    }
}

impl DocumentSource for LimitSource {
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
        if self.passed >= self.limit {
            return Ok(None);
        }
        let next = upstream(Self::NAME, &mut self.source)?.next_document()?;
        if next.is_some() {
            self.passed += 1;
        }
        Ok(next)
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn coalesce(&mut self, next: &dyn DocumentSource) -> bool {
        match next.as_any().downcast_ref::<Self>() {
            Some(other) => {
                self.limit = self.limit.min(other.limit);
                true
            }
            None => false,
        }
    }

    fn dispose(&mut self) {
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        stage_document(Self::NAME, Value::int_or_long(self.limit))
    }

    fn split(&self) -> Option<StageSplit> {
        Some(StageSplit {
            shard: Some(Box::new(Self::new(self.limit, self.ctx.clone()))),
            merge: Some(Box::new(Self::new(self.limit, self.ctx.clone()))),
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

    fn numbers(n: i32) -> Box<dyn DocumentSource> {
        let docs = (0..n).map(|i| Document::new().with("n", i)).collect();
        Box::new(ArraySource::new(docs, ExpressionContext::detached()))
    }

    fn drain(source: &mut dyn DocumentSource) -> usize {
        let mut count = 0;
        while source.next_document().unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[test]
    fn parse_errors() {
        let ctx = ExpressionContext::detached();
        assert_eq!(LimitSource::parse(&Value::from("x"), &ctx).unwrap_err().code(), Some(15957));
        assert_eq!(LimitSource::parse(&Value::Int(0), &ctx).unwrap_err().code(), Some(15958));
        assert_eq!(LimitSource::parse(&Value::Long(-3), &ctx).unwrap_err().code(), Some(15958));
        let stage = LimitSource::parse(&Value::Double(2.0), &ctx).unwrap();
        assert_eq!(stage.serialize(false).to_string(), r#"{"$limit":2}"#);
    }

    #[test]
    fn stops_early() {
        let mut limit = LimitSource::new(3, ExpressionContext::detached());
        limit.set_source(numbers(10)).unwrap();
        assert_eq!(drain(&mut limit), 3);

        let mut short = LimitSource::new(3, ExpressionContext::detached());
        short.set_source(numbers(2)).unwrap();
        assert_eq!(drain(&mut short), 2);
    }

    #[test]
    fn coalesce_keeps_the_minimum() {
        let ctx = ExpressionContext::detached();
        let mut first = LimitSource::new(10, ctx.clone());
        assert!(first.coalesce(&LimitSource::new(3, ctx.clone())));
        assert_eq!(first.limit(), 3);
        assert!(first.coalesce(&LimitSource::new(7, ctx.clone())));
        assert_eq!(first.limit(), 3);
        assert!(!first.coalesce(&ArraySource::new(Vec::new(), ctx)));
    }

    #[test]
    fn splits_into_both_halves() {
        let split = LimitSource::new(4, ExpressionContext::detached()).split().unwrap();
        assert_eq!(split.shard.unwrap().serialize(false).to_string(), r#"{"$limit":4}"#);
        assert_eq!(split.merge.unwrap().serialize(false).to_string(), r#"{"$limit":4}"#);
    }
}
