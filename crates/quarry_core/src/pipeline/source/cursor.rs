//! Collection input: streams documents from a collection scan.

use super::{DocumentSource, StageState};
use crate::collection::CollectionScan;
use crate::error::CoreResult;
use crate::lock::LockGuard;
use crate::pipeline::ExpressionContext;
use quarry_codec::Document;
use std::any::Any;

/// Reads a collection while holding a shared lease on its database.
///
/// The lease and the scan are released as soon as the scan ends, fails or
/// the source is disposed; an error is returned only after both are gone.
#[derive(Debug)]
pub struct CursorSource {
    ctx: ExpressionContext,
    state: StageState,
    ns: String,
    scan: Option<CollectionScan>,
    lease: Option<LockGuard>,
}

impl CursorSource {
    /// Creates a source over `scan`, keeping `lease` until it ends.
    #[must_use]
    pub fn new(ns: &str, scan: CollectionScan, lease: LockGuard, ctx: ExpressionContext) -> Self {
        Self {
            ctx,
            state: StageState::default(),
            ns: ns.to_string(),
            scan: Some(scan),
            lease: Some(lease),
        }
    }

    /// Returns true while the database lease is held.
    #[must_use]
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    fn release(&mut self) {
        if self.lease.is_some() {
            tracing::trace!(ns = %self.ns, "releasing cursor lease");
        }
        self.scan = None;
        self.lease = None;
    }
}

impl DocumentSource for CursorSource {
    fn source_name(&self) -> &'static str {
        "$cursor"
    }

    fn context(&self) -> &ExpressionContext {
        &self.ctx
    }

    fn state(&mut self) -> &mut StageState {
        &mut self.state
    }

    fn fetch(&mut self) -> CoreResult<Option<Document>> {
        let Some(scan) = self.scan.as_mut() else {
            return Ok(None);
        };
        match scan.next() {
            Some(Ok(doc)) => Ok(Some(doc)),
            Some(Err(err)) => {
                self.release();
                Err(err)
            }
            None => {
                self.release();
                Ok(None)
            }
        }
    }

    fn dispose(&mut self) {
        self.release();
    }

    fn serialize(&self, _explain: bool) -> Document {
        Document::new().with("$cursor", Document::new().with("ns", self.ns.as_str()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
