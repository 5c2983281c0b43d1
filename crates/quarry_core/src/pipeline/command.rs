//! The `aggregate` command document and its execution.

use super::source::{ArraySource, DocumentSource};
use super::{ExpressionContext, Pipeline};
use crate::error::{CoreError, CoreResult};
use quarry_codec::{Document, Value};

/// A parsed `{aggregate, pipeline, explain, splitPipeline}` command.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCommand {
    collection: String,
    pipeline: Vec<Value>,
    explain: bool,
    split: bool,
}

/// What running an [`AggregateCommand`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateReply {
    /// Stage descriptions; nothing was read.
    Explain(Document),
    /// Output documents, plus the `$out` target collection if any.
    Results {
        /// Documents produced by the last stage.
        documents: Vec<Document>,
        /// Collection name the documents are to be written to.
        out: Option<String>,
    },
}

impl AggregateReply {
    /// Builds the reply document: `{result: [...], ok: 1}` for results.
    #[must_use]
    pub fn into_document(self) -> Document {
        match self {
            Self::Explain(doc) => doc,
            Self::Results { documents, .. } => Document::new()
                .with("result", documents.into_iter().map(Value::Document).collect::<Vec<_>>())
                .with("ok", 1),
        }
    }
}

impl AggregateCommand {
    /// Creates a command running `pipeline` over `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, pipeline: Vec<Value>) -> Self {
        Self {
            collection: collection.into(),
            pipeline,
            explain: false,
            split: false,
        }
    }

    /// Requests stage descriptions instead of results.
    #[must_use]
    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    /// Requests shard and merge halves to be run one after the other.
    #[must_use]
    pub fn with_split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    /// Parses a command document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a missing or mistyped
    /// field, or an unknown one.
    pub fn parse(command: &Document) -> CoreResult<Self> {
        let mut collection = None;
        let mut pipeline = None;
        let mut explain = false;
        let mut split = false;
        for (name, value) in command.iter() {
            match name {
                "aggregate" => match value.as_str() {
                    Some(name) if !name.is_empty() => collection = Some(name.to_string()),
                    _ => return Err(CoreError::invalid_operation("aggregate must name a collection")),
                },
                "pipeline" => match value.as_array() {
                    Some(stages) => pipeline = Some(stages.to_vec()),
                    None => return Err(CoreError::invalid_operation("pipeline must be an array")),
                },
                "explain" => explain = flag(name, value)?,
                "splitPipeline" => split = flag(name, value)?,
                other => {
                    return Err(CoreError::invalid_operation(format!(
                        "unrecognized field '{other}' in aggregate command"
                    )))
                }
            }
        }
        let collection =
            collection.ok_or_else(|| CoreError::invalid_operation("aggregate command is missing 'aggregate'"))?;
        let pipeline =
            pipeline.ok_or_else(|| CoreError::invalid_operation("aggregate command is missing 'pipeline'"))?;
        Ok(Self {
            collection,
            pipeline,
            explain,
            split,
        })
    }

    /// Returns the input collection name, without its database.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the declared stages.
    #[must_use]
    pub fn pipeline(&self) -> &[Value] {
        &self.pipeline
    }

    /// Returns true for explain.
    #[must_use]
    pub fn is_explain(&self) -> bool {
        self.explain
    }

    /// Returns true for split execution.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Serializes the command back to its document form.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with("aggregate", self.collection.as_str())
            .with("pipeline", self.pipeline.clone());
        if self.explain {
            doc.insert("explain", true);
        }
        if self.split {
            doc.insert("splitPipeline", true);
        }
        doc
    }

    /// Parses, optimizes and runs the pipeline.
    ///
    /// `input` opens the collection source; it is called once, or not at
    /// all for explain. `input_description` is the explain entry for it.
    /// With `verify_round_trip` the optimized pipeline is re-parsed from
    /// its declaration before running.
    ///
    /// # Errors
    ///
    /// Returns any parse, optimize or stage error, or the error of `input`.
    pub fn execute(
        &self,
        ctx: &ExpressionContext,
        input_description: Document,
        verify_round_trip: bool,
        input: impl FnOnce(&ExpressionContext) -> CoreResult<Box<dyn DocumentSource>>,
    ) -> CoreResult<AggregateReply> {
        let mut pipeline = Pipeline::parse(&self.pipeline, ctx.clone())?;
        pipeline.optimize()?;

        if self.split {
            return self.execute_split(pipeline, ctx, input_description, input);
        }

        if self.explain {
            let mut stages = vec![Value::Document(input_description)];
            stages.extend(pipeline.explain());
            return Ok(AggregateReply::Explain(
                Document::new().with("stages", stages).with("ok", 1),
            ));
        }

        if verify_round_trip && !ctx.in_shard() {
            let declaration = pipeline.to_declaration();
            pipeline = Pipeline::parse(&declaration, ctx.clone())?;
            pipeline.optimize()?;
            tracing::trace!(stages = pipeline.len(), "pipeline round-tripped through its declaration");
        }

        let out = pipeline.out_target().map(str::to_string);
        let documents = pipeline.run(input(ctx)?)?;
        Ok(AggregateReply::Results { documents, out })
    }

    /// Runs the shard half over the input as if it had been shipped to a
    /// shard, then feeds its output to the merge half.
    fn execute_split(
        &self,
        mut merge: Pipeline,
        ctx: &ExpressionContext,
        input_description: Document,
        input: impl FnOnce(&ExpressionContext) -> CoreResult<Box<dyn DocumentSource>>,
    ) -> CoreResult<AggregateReply> {
        let shard = merge.split();
        let shard_declaration = shard.to_declaration();
        let shard_text = Value::Array(shard_declaration.clone());
        let merge_text = Value::Array(merge.to_declaration());
        tracing::debug!(shard = %shard_text, merge = %merge_text, "split aggregate pipeline");

        if self.explain {
            let mut shard_stages = vec![Value::Document(input_description)];
            shard_stages.extend(shard.explain());
            return Ok(AggregateReply::Explain(
                Document::new()
                    .with("shardPipeline", shard_stages)
                    .with("mergePipeline", merge.explain())
                    .with("ok", 1),
            ));
        }

        let shard_ctx = ExpressionContext::new(ctx.interrupt_handle()).with_in_shard(true);
        let mut shipped = Pipeline::parse(&shard_declaration, shard_ctx.clone())?;
        shipped.optimize()?;
        let partial = shipped.run(input(&shard_ctx)?)?;
        tracing::debug!(partial = partial.len(), "shard half finished");

        let merge_ctx = merge.context().clone();
        let out = merge.out_target().map(str::to_string);
        let documents = merge.run(Box::new(ArraySource::new(partial, merge_ctx)))?;
        Ok(AggregateReply::Results { documents, out })
    }
}

fn flag(name: &str, value: &Value) -> CoreResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| CoreError::invalid_operation(format!("'{name}' must be a boolean")))
}
