//! Execution flags shared by every stage of one pipeline.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where and how a pipeline runs.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    in_shard: bool,
    in_router: bool,
    doing_merge: bool,
    interrupt: Arc<AtomicBool>,
}

impl ExpressionContext {
    /// Creates a context polling `interrupt`.
    #[must_use]
    pub fn new(interrupt: Arc<AtomicBool>) -> Self {
        Self {
            in_shard: false,
            in_router: false,
            doing_merge: false,
            interrupt,
        }
    }

    /// Creates a context with its own, never set, interrupt flag.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)))
    }

    /// Marks the pipeline as the shard half of a split.
    #[must_use]
    pub fn with_in_shard(mut self, value: bool) -> Self {
        self.in_shard = value;
        self
    }

    /// Marks the pipeline as the merging half of a split.
    #[must_use]
    pub fn with_in_router(mut self, value: bool) -> Self {
        self.in_router = value;
        self
    }

    /// Marks stages as combining partial results.
    #[must_use]
    pub fn with_doing_merge(mut self, value: bool) -> Self {
        self.doing_merge = value;
        self
    }

    /// Returns true for the shard half of a split.
    #[must_use]
    pub fn in_shard(&self) -> bool {
        self.in_shard
    }

    /// Returns true for the merging half of a split.
    #[must_use]
    pub fn in_router(&self) -> bool {
        self.in_router
    }

    /// Returns true while combining partial results.
    #[must_use]
    pub fn doing_merge(&self) -> bool {
        self.doing_merge
    }

    /// Returns the interrupt flag.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Fails if interruption was requested.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Interrupted`].
    pub fn check_for_interrupt(&self) -> CoreResult<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            Err(CoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_interrupt() {
        let ctx = ExpressionContext::detached().with_in_router(true).with_doing_merge(true);
        assert!(ctx.in_router());
        assert!(ctx.doing_merge());
        assert!(!ctx.in_shard());
        assert!(ctx.check_for_interrupt().is_ok());

        ctx.interrupt_handle().store(true, Ordering::SeqCst);
        assert!(matches!(ctx.check_for_interrupt(), Err(CoreError::Interrupted)));
    }
}
