//! Pipeline stages and the pull contract they share.
//!
//! Every stage is a [`DocumentSource`]. Stages are linked into a chain by
//! [`DocumentSource::set_source`]; the consumer pulls from the last stage
//! with `eof` / `current` / `advance`, and each stage pulls from its
//! upstream on demand. Nothing is read before the first `eof` or `current`
//! call.

mod array;
mod cursor;
mod filter;
mod group;
mod limit;
mod out;
mod project;
mod skip;
mod sort;

pub use array::ArraySource;
pub use cursor::CursorSource;
pub use filter::{Clause, MatchSource};
pub use group::GroupSource;
pub use limit::LimitSource;
pub use out::OutSource;
pub use project::ProjectSource;
pub use skip::SkipSource;
pub use sort::SortSource;

use crate::error::{CoreError, CoreResult};
use crate::pipeline::ExpressionContext;
use quarry_codec::{Document, Value};
use std::any::Any;
use std::fmt;

/// Pull-contract bookkeeping: whether the first document was fetched, and
/// the document under the cursor.
#[derive(Debug, Default)]
pub struct StageState {
    primed: bool,
    current: Option<Document>,
}

/// The two halves of a stage split for partitioned execution.
#[derive(Debug, Default)]
pub struct StageSplit {
    /// Runs next to the data, before the split point.
    pub shard: Option<Box<dyn DocumentSource>>,
    /// Combines the shard outputs, after the split point.
    pub merge: Option<Box<dyn DocumentSource>>,
}

/// A stage of a pipeline, or the input feeding one.
///
/// Implementors provide [`fetch`](Self::fetch), which produces the next
/// document; the provided methods turn it into the lazy, monotonic
/// `eof` / `current` / `advance` contract.
pub trait DocumentSource: Send + fmt::Debug {
    /// Returns the stage name, such as `$limit`.
    fn source_name(&self) -> &'static str;

    /// Returns the execution flags of the pipeline.
    fn context(&self) -> &ExpressionContext;

    /// Returns the pull bookkeeping.
    fn state(&mut self) -> &mut StageState;

    /// Produces the next output document, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Propagates upstream and evaluation errors.
    fn fetch(&mut self) -> CoreResult<Option<Document>>;

    /// Connects the upstream stage.
    ///
    /// # Errors
    ///
    /// Initial sources take no upstream; a stage takes exactly one.
    fn set_source(&mut self, source: Box<dyn DocumentSource>) -> CoreResult<()> {
        drop(source);
        Err(CoreError::fatal(format!(
            "{} does not accept an input",
            self.source_name()
        )))
    }

    /// Absorbs `next`, the stage right after this one, if both can be
    /// expressed as this stage alone. Returns true if `next` can be removed.
    fn coalesce(&mut self, next: &dyn DocumentSource) -> bool {
        let _ = next;
        false
    }

    /// Simplifies the stage before execution.
    ///
    /// # Errors
    ///
    /// Fails if expression optimization fails.
    fn optimize(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Releases buffered documents, cursors and locks, upstream included.
    fn dispose(&mut self) {}

    /// Serializes to the declarative form `{<name>: <spec>}`.
    fn serialize(&self, explain: bool) -> Document;

    /// Splits the stage for partitioned execution; `None` if the stage
    /// runs entirely next to the data.
    fn split(&self) -> Option<StageSplit> {
        None
    }

    /// Upcast used by [`coalesce`](Self::coalesce) to recognize stage kinds.
    fn as_any(&self) -> &dyn Any;

    /// Returns true once no document remains. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates errors from fetching the first document.
    fn eof(&mut self) -> CoreResult<bool> {
        prime(self)?;
        Ok(self.state().current.is_none())
    }

    /// Returns the document under the cursor.
    ///
    /// # Errors
    ///
    /// Propagates errors from fetching the first document.
    fn current(&mut self) -> CoreResult<Option<&Document>> {
        prime(self)?;
        Ok(self.state().current.as_ref())
    }

    /// Moves to the next document; returns false when exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Interrupted`] if the operation was interrupted,
    /// or an upstream error.
    fn advance(&mut self) -> CoreResult<bool> {
        self.context().check_for_interrupt()?;
        prime(self)?;
        if self.state().current.is_none() {
            return Ok(false);
        }
        let next = self.fetch()?;
        let state = self.state();
        state.current = next;
        Ok(state.current.is_some())
    }

    /// Takes the document under the cursor and advances past it.
    ///
    /// # Errors
    ///
    /// Same as [`advance`](Self::advance).
    fn next_document(&mut self) -> CoreResult<Option<Document>> {
        self.context().check_for_interrupt()?;
        prime(self)?;
        let Some(doc) = self.state().current.take() else {
            return Ok(None);
        };
        let next = self.fetch()?;
        self.state().current = next;
        Ok(Some(doc))
    }
}

fn prime<S: DocumentSource + ?Sized>(source: &mut S) -> CoreResult<()> {
    if !source.state().primed {
        let first = source.fetch()?;
        let state = source.state();
        state.primed = true;
        state.current = first;
    }
    Ok(())
}

/// Returns the upstream stage, failing if none was connected.
pub(crate) fn upstream<'a>(
    name: &str,
    source: &'a mut Option<Box<dyn DocumentSource>>,
) -> CoreResult<&'a mut dyn DocumentSource> {
    match source {
        Some(source) => Ok(source.as_mut()),
        None => Err(CoreError::fatal(format!("{name} has no input"))),
    }
}

/// Connects `source` into the `slot` of stage `name`.
pub(crate) fn attach(
    name: &str,
    slot: &mut Option<Box<dyn DocumentSource>>,
    source: Box<dyn DocumentSource>,
) -> CoreResult<()> {
    if slot.is_some() {
        return Err(CoreError::fatal(format!("{name} already has an input")));
    }
    *slot = Some(source);
    Ok(())
}

/// Disposes the upstream stage, if any.
pub(crate) fn dispose_upstream(slot: &mut Option<Box<dyn DocumentSource>>) {
    if let Some(source) = slot {
        source.dispose();
    }
}

/// Builds `{name: value}`.
pub(crate) fn stage_document(name: &str, value: impl Into<Value>) -> Document {
    Document::new().with(name, value)
}

/// Reads a numeric stage argument as an integer.
pub(crate) fn numeric_argument(value: &Value, code: u32, message: &str) -> CoreResult<i64> {
    if !value.is_numeric() {
        return Err(CoreError::user(code, message));
    }
    Ok(value.coerce_to_long()?)
}
