//! Aggregation pipelines.
//!
//! A [`Pipeline`] is parsed from a list of single-field stage documents,
//! optimized (adjacent stages coalesced, expressions simplified), and run
//! by linking its stages behind an input source and draining the last one.
//!
//! For partitioned execution, [`Pipeline::split`] cuts the pipeline at its
//! first splittable stage: everything before it, plus that stage's shard
//! half, runs next to the data; the merge half and the remaining stages
//! combine the partial results.
//!
//! ```
//! use quarry_codec::{Document, Value};
//! use quarry_core::pipeline::{ArraySource, ExpressionContext, Pipeline};
//!
//! let spec = Value::from_json_str(r#"[{"$match": {"a": {"$gt": 2}}}, {"$limit": 1}]"#).unwrap();
//! let ctx = ExpressionContext::detached();
//! let mut pipeline = Pipeline::parse(spec.as_array().unwrap(), ctx.clone()).unwrap();
//! pipeline.optimize().unwrap();
//!
//! let docs = [1, 5, 9].iter().map(|&a| Document::new().with("a", a)).collect();
//! let out = pipeline.run(Box::new(ArraySource::new(docs, ctx))).unwrap();
//! assert_eq!(out, vec![Document::new().with("a", 5)]);
//! ```

pub mod accumulator;
mod command;
mod context;
pub mod expression;
pub mod source;

pub use command::{AggregateCommand, AggregateReply};
pub use context::ExpressionContext;
pub use source::{
    ArraySource, CursorSource, DocumentSource, GroupSource, LimitSource, MatchSource, OutSource,
    ProjectSource, SkipSource, SortSource, StageSplit,
};

use crate::error::{CoreError, CoreResult};
use quarry_codec::{Document, Value};

type StageParser = fn(&Value, &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>>;

/// Stage parsers by name, sorted for binary search.
const STAGE_TABLE: &[(&str, StageParser)] = &[
    (GroupSource::NAME, GroupSource::parse),
    (LimitSource::NAME, LimitSource::parse),
    (MatchSource::NAME, MatchSource::parse),
    (OutSource::NAME, OutSource::parse),
    (ProjectSource::NAME, ProjectSource::parse),
    (SkipSource::NAME, SkipSource::parse),
    (SortSource::NAME, SortSource::parse),
];

/// An ordered chain of stages, not yet linked to an input.
#[derive(Debug)]
pub struct Pipeline {
    ctx: ExpressionContext,
    stages: Vec<Box<dyn DocumentSource>>,
}

impl Pipeline {
    /// Parses a list of stage documents.
    ///
    /// # Errors
    ///
    /// Code 15942 for an element that is not an object, 16435 for a stage
    /// object without exactly one field, 16436 for an unknown stage, 16991
    /// if `$out` is not last, or any stage parse error.
    pub fn parse(spec: &[Value], ctx: ExpressionContext) -> CoreResult<Self> {
        let mut stages = Vec::with_capacity(spec.len());
        for (position, element) in spec.iter().enumerate() {
            let Some(stage) = element.as_document() else {
                return Err(CoreError::user(15942, "pipeline element is not an object"));
            };
            let (name, argument) = match stage.first() {
                Some(field) if stage.len() == 1 => field,
                _ => {
                    return Err(CoreError::user(
                        16435,
                        "a pipeline stage specification object must contain exactly one field",
                    ))
                }
            };
            let Ok(index) = STAGE_TABLE.binary_search_by(|(candidate, _)| (*candidate).cmp(name)) else {
                return Err(CoreError::user(
                    16436,
                    format!("unrecognized pipeline stage name: '{name}'"),
                ));
            };
            if name == OutSource::NAME && position + 1 != spec.len() {
                return Err(CoreError::user(16991, "$out can only be the final stage in the pipeline"));
            }
            stages.push((STAGE_TABLE[index].1)(argument, &ctx)?);
        }
        Ok(Self { ctx, stages })
    }

    /// Returns the execution flags.
    #[must_use]
    pub fn context(&self) -> &ExpressionContext {
        &self.ctx
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.source_name()).collect()
    }

    /// Coalesces adjacent stages, left to right, then optimizes each stage.
    ///
    /// # Errors
    ///
    /// Fails if an expression cannot be optimized.
    pub fn optimize(&mut self) -> CoreResult<()> {
        let mut kept: Vec<Box<dyn DocumentSource>> = Vec::with_capacity(self.stages.len());
        for stage in self.stages.drain(..) {
            if let Some(last) = kept.last_mut() {
                if last.coalesce(stage.as_ref()) {
                    continue;
                }
            }
            kept.push(stage);
        }
        for stage in &mut kept {
            stage.optimize()?;
        }
        self.stages = kept;
        Ok(())
    }

    /// Splits off the part that runs next to the data and returns it; this
    /// pipeline keeps the merging part.
    ///
    /// The returned pipeline is flagged as running in a shard; this one as
    /// running in the router and merging.
    pub fn split(&mut self) -> Pipeline {
        let mut shard = Vec::new();
        let mut remaining = std::mem::take(&mut self.stages).into_iter();
        for stage in remaining.by_ref() {
            if let Some(StageSplit { shard: head, merge }) = stage.split() {
                shard.extend(head);
                self.stages.extend(merge);
                break;
            }
            shard.push(stage);
        }
        self.stages.extend(remaining);
        self.ctx = self.ctx.clone().with_in_router(true).with_doing_merge(true);
        tracing::debug!(shard = shard.len(), merge = self.stages.len(), "split pipeline");
        Pipeline {
            ctx: self.ctx.clone().with_in_router(false).with_doing_merge(false).with_in_shard(true),
            stages: shard,
        }
    }

    /// Serializes the stages back to their declarative form.
    #[must_use]
    pub fn to_declaration(&self) -> Vec<Value> {
        self.stages
            .iter()
            .map(|stage| Value::Document(stage.serialize(false)))
            .collect()
    }

    /// Describes the stages for explain output.
    #[must_use]
    pub fn explain(&self) -> Vec<Value> {
        self.stages
            .iter()
            .map(|stage| Value::Document(stage.serialize(true)))
            .collect()
    }

    /// Returns the `$out` target collection, if the last stage is `$out`.
    #[must_use]
    pub fn out_target(&self) -> Option<&str> {
        self.stages
            .last()
            .and_then(|stage| stage.as_any().downcast_ref::<OutSource>())
            .map(OutSource::target)
    }

    /// Links the stages behind `input` and collects every output document.
    ///
    /// The chain is disposed whether or not the run succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, or [`CoreError::Interrupted`].
    pub fn run(self, input: Box<dyn DocumentSource>) -> CoreResult<Vec<Document>> {
        let mut head = input;
        for mut stage in self.stages {
            stage.set_source(head)?;
            head = stage;
        }

        let mut output = Vec::new();
        let result = loop {
            match head.next_document() {
                Ok(Some(doc)) => output.push(doc),
                Ok(None) => break Ok(output),
                Err(err) => break Err(err),
            }
        };
        head.dispose();
        result
    }
}
