//! Database-level shared/exclusive locks.
//!
//! Each database name maps to one reader/writer lock. Readers are
//! preferred: a shared request only waits while a writer holds the lock, so
//! a thread that already holds a shared lock can take a second shared lease
//! (a cursor does this) without deadlocking behind a queued writer. Every
//! wait is bounded by the configured timeout.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Level of a database lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// Any number of holders; excludes writers.
    Shared,
    /// Single holder; excludes everyone else.
    Exclusive,
}

#[derive(Debug, Default)]
struct LockCounts {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct ResourceLock {
    counts: Mutex<LockCounts>,
    released: Condvar,
}

/// Hands out database locks.
#[derive(Debug)]
pub struct LockManager {
    timeout: Duration,
    resources: Mutex<HashMap<String, Arc<ResourceLock>>>,
}

impl LockManager {
    /// Creates a lock manager whose waits give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires `resource` at `level`, blocking up to the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock could not be taken in time.
    pub fn acquire(&self, resource: &str, level: LockLevel) -> CoreResult<LockGuard> {
        let lock = Arc::clone(self.resources.lock().entry(resource.to_string()).or_default());
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut counts = lock.counts.lock();
        loop {
            let free = match level {
                LockLevel::Shared => !counts.writer,
                LockLevel::Exclusive => !counts.writer && counts.readers == 0,
            };
            if free {
                break;
            }
            if lock.released.wait_until(&mut counts, deadline).timed_out() {
                return Err(CoreError::LockTimeout {
                    resource: resource.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        match level {
            LockLevel::Shared => counts.readers += 1,
            LockLevel::Exclusive => counts.writer = true,
        }
        drop(counts);

        tracing::trace!(resource, ?level, "lock acquired");
        Ok(LockGuard {
            lock,
            resource: resource.to_string(),
            level,
        })
    }
}

/// A held database lock, released on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<ResourceLock>,
    resource: String,
    level: LockLevel,
}

impl LockGuard {
    /// Returns the lock level.
    #[must_use]
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Returns the locked resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut counts = self.lock.counts.lock();
        match self.level {
            LockLevel::Shared => counts.readers = counts.readers.saturating_sub(1),
            LockLevel::Exclusive => counts.writer = false,
        }
        drop(counts);
        self.lock.released.notify_all();
        tracing::trace!(resource = %self.resource, level = ?self.level, "lock released");
    }
}
