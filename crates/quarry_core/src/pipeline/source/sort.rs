//! `$sort`: order the whole input by a list of keys.

use super::{attach, dispose_upstream, stage_document, upstream};
use super::{DocumentSource, StageSplit, StageState};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::expression::FieldPath;
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct SortKey {
    path: FieldPath,
    ascending: bool,
}

/// Buffers its input and yields it in key order. Ties keep input order.
#[derive(Debug)]
pub struct SortSource {
    ctx: ExpressionContext,
    state: StageState,
    source: Option<Box<dyn DocumentSource>>,
    keys: Vec<SortKey>,
    sorted: Option<std::vec::IntoIter<Document>>,
}

impl SortSource {
    /// Stage name.
    pub const NAME: &'static str = "$sort";

    /// Parses `{$sort: {field: 1 | -1, ...}}`.
    ///
    /// # Errors
    ///
    /// Code 15973 if the argument is not an object, 15974 for a direction
    /// other than 1 or -1, 15976 for an empty key list.
    pub fn parse(spec: &Value, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let Some(spec) = spec.as_document() else {
            return Err(CoreError::user(15973, "the $sort key specification must be an object"));
        };
        let mut keys = Vec::with_capacity(spec.len());
        for (name, direction) in spec.iter() {
            let ascending = match direction.coerce_to_long() {
                Ok(1) if direction.is_numeric() => true,
                Ok(-1) if direction.is_numeric() => false,
                _ => {
                    return Err(CoreError::user(
                        15974,
                        format!("$sort key ordering for '{name}' must be 1 (for ascending) or -1 (for descending)"),
                    ))
                }
            };
            keys.push(SortKey {
                path: FieldPath::parse(name)?,
                ascending,
            });
        }
        if keys.is_empty() {
            return Err(CoreError::user(15976, "$sort stage must have at least one sort key"));
        }
        Ok(Box::new(Self::with_keys(keys, ctx.clone())))
    }

    fn with_keys(keys: Vec<SortKey>, ctx: ExpressionContext) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            source: None,
            keys,
            sorted: None,
        }
    }

    fn sort_input(&mut self) -> CoreResult<std::vec::IntoIter<Document>> {
        let source = upstream(Self::NAME, &mut self.source)?;
        let mut rows: Vec<(Vec<Value>, Document)> = Vec::new();
        while let Some(doc) = source.next_document()? {
            let values = self
                .keys
                .iter()
                .map(|key| key.path.evaluate(&doc))
                .collect::<CoreResult<Vec<_>>>()?;
            rows.push((values, doc));
        }

        let keys = &self.keys;
        rows.sort_by(|(left, _), (right, _)| {
            for ((a, b), key) in left.iter().zip(right).zip(keys) {
                let ord = a.compare(b);
                if ord != Ordering::Equal {
                    return if key.ascending { ord } else { ord.reverse() };
                }
            }
            Ordering::Equal
        });
        Ok(rows.into_iter().map(|(_, doc)| doc).collect::<Vec<_>>().into_iter())
    }
}

impl DocumentSource for SortSource {
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
        if self.sorted.is_none() {
            self.sorted = Some(self.sort_input()?);
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next))
    }

    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        attach(Self::NAME, &mut self.source, source)
    }

    fn dispose(&mut self) {
        self.sorted = None;
        dispose_upstream(&mut self.source);
    }

    fn serialize(&self, _explain: bool) -> Document {
        let spec = self
            .keys
            .iter()
            .map(|key| (key.path.to_string(), Value::Int(if key.ascending { 1 } else { -1 })))
            .collect::<Document>();
        stage_document(Self::NAME, spec)
    }

    /// Each shard sorts its part; the merge side sorts the union.
    fn split(&self) -> Option<StageSplit> {
        Some(StageSplit {
            shard: Some(Box::new(Self::with_keys(self.keys.clone(), self.ctx.clone()))),
            merge: Some(Box::new(Self::with_keys(self.keys.clone(), self.ctx.clone()))),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
