//! `$out`: name the collection that receives the results.

use super::{attach, dispose_upstream, stage_document, upstream};
use super::{DocumentSource, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;

/// Passes documents through unchanged. The aggregate command writes the
/// pipeline output into [`target`](Self::target) of the same database.
#[derive(Debug)]
pub struct OutSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    target: String,
}

impl OutSource {
    /// Stage name.
    pub const NAME: &'static str = "$out";

    /// Parses `{$out: "collection"}`.
    ///
    /// # Errors
    ///
    /// Code 16990 if the argument is not a non-empty string.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let target = match spec.as_str() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(CoreError::user(
                    16990,
                    format!("$out only supports a collection name, not {}", spec.value_type()),
                ))
            }
        };
        Ok(Box::new(Self {
            ctx: ctx.clone(),
            state: StageState::default(),
            source: None,
            target,
        }))
    }

    /// Returns the target collection name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl DocumentSource for OutSource {
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
        upstream(Self::NAME, &mut self.source)?.next_document()
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn dispose(&mut self) {
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        stage_document(Self::NAME, self.target.as_str())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let ctx = ExpressionContext::detached();
        let stage = OutSource::parse(&Value::from("archive"), &ctx).unwrap();
        let out = stage.as_any().downcast_ref::<OutSource>().unwrap();
        assert_eq!(out.target(), "archive");
        assert_eq!(stage.serialize(false).to_string(), r#"{"$out":"archive"}"#);

        assert_eq!(OutSource::parse(&Value::Int(1), &ctx).unwrap_err().code(), Some(16990));
        assert_eq!(OutSource::parse(&Value::from(""), &ctx).unwrap_err().code(), Some(16990));
    }
}
