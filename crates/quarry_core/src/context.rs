//! Per-operation state: locks, transactions and the interrupt flag.

use crate::error::{CoreError, CoreResult};
use crate::lock::{LockGuard, LockLevel, LockManager};
use crate::rollback::RollbackLedger;
use crate::types::{database_of, ConnectionId};
use quarry_storage::{Environment, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct TxnFrame {
    txn: Transaction,
    ledger: RollbackLedger,
}

/// Everything one client operation carries through the catalog.
///
/// The context is passed explicitly to every catalog call. It owns the
/// database locks the operation holds, a stack of open transactions (each
/// with its rollback ledger) and the interrupt flag pipelines poll.
///
/// Dropping a context aborts its open transactions and releases its locks.
pub struct OperationContext {
    connection: ConnectionId,
    locks: Arc<LockManager>,
    held: HashMap<String, LockGuard>,
    txns: Vec<TxnFrame>,
    interrupt: Arc<AtomicBool>,
}

impl OperationContext {
    /// Creates a context for `connection`.
    #[must_use]
    pub fn new(connection: ConnectionId, locks: Arc<LockManager>) -> Self {
        Self {
            connection,
            locks,
            held: HashMap::new(),
            txns: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the connection this operation runs for.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Returns the lock manager this context acquires from.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    // === Locks ===

    /// Takes a shared lock on database `db` unless any lock on it is held.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the wait times out.
    pub fn lock_shared(&mut self, db: &str) -> CoreResult<()> {
        if self.held.contains_key(db) {
            return Ok(());
        }
        let guard = self.locks.acquire(db, LockLevel::Shared)?;
        self.held.insert(db.to_string(), guard);
        Ok(())
    }

    /// Takes the exclusive lock on database `db`.
    ///
    /// A held shared lock is released first, so the upgrade is not atomic:
    /// callers re-run their whole operation after upgrading.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the wait times out.
    pub fn lock_exclusive(&mut self, db: &str) -> CoreResult<()> {
        match self.held.get(db).map(LockGuard::level) {
            Some(LockLevel::Exclusive) => return Ok(()),
            Some(LockLevel::Shared) => {
                self.held.remove(db);
            }
            None => {}
        }
        let guard = self.locks.acquire(db, LockLevel::Exclusive)?;
        self.held.insert(db.to_string(), guard);
        Ok(())
    }

    /// Releases any lock held on `db`.
    pub fn unlock(&mut self, db: &str) {
        self.held.remove(db);
    }

    /// Releases every held lock.
    pub fn unlock_all(&mut self) {
        self.held.clear();
    }

    /// Returns the level held on the database of `resource`, if any.
    #[must_use]
    pub fn lock_level(&self, resource: &str) -> Option<LockLevel> {
        self.held.get(database_of(resource)).map(LockGuard::level)
    }

    /// Returns true if the database of `resource` is exclusively locked.
    #[must_use]
    pub fn is_write_locked(&self, resource: &str) -> bool {
        self.lock_level(resource) == Some(LockLevel::Exclusive)
    }

    /// Checks that the database of `resource` is locked at any level.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotHeld`] otherwise.
    pub fn assert_at_least_read_locked(&self, resource: &str) -> CoreResult<()> {
        if self.lock_level(resource).is_some() {
            Ok(())
        } else {
            Err(CoreError::LockNotHeld {
                resource: database_of(resource).to_string(),
                required: "read",
            })
        }
    }

    /// Checks that the database of `resource` is exclusively locked.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotHeld`] otherwise.
    pub fn assert_write_locked(&self, resource: &str) -> CoreResult<()> {
        if self.is_write_locked(resource) {
            Ok(())
        } else {
            Err(CoreError::LockNotHeld {
                resource: database_of(resource).to_string(),
                required: "write",
            })
        }
    }

    // === Transactions ===

    /// Begins a transaction on top of the stack.
    pub fn begin(&mut self, env: &Environment, read_only: bool) {
        let txn = env.begin(read_only);
        tracing::trace!(conn = %self.connection, txn = %txn.id(), read_only, "begin");
        self.txns.push(TxnFrame {
            txn,
            ledger: RollbackLedger::new(),
        });
    }

    /// Returns true if a transaction is open.
    #[must_use]
    pub fn has_txn(&self) -> bool {
        !self.txns.is_empty()
    }

    /// Returns the innermost transaction, if any.
    #[must_use]
    pub fn current_txn(&self) -> Option<&Transaction> {
        self.txns.last().map(|frame| &frame.txn)
    }

    /// Returns the innermost transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no transaction is open.
    pub fn txn(&self) -> CoreResult<&Transaction> {
        self.current_txn()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))
    }

    /// Returns the rollback ledger of the innermost transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no transaction is open.
    pub fn ledger_mut(&mut self) -> CoreResult<&mut RollbackLedger> {
        self.txns
            .last_mut()
            .map(|frame| &mut frame.ledger)
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))
    }

    /// Commits the innermost transaction.
    ///
    /// If the storage commit fails the transaction is gone and its
    /// rollback ledger is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the commit fails.
    pub fn commit(&mut self) -> CoreResult<()> {
        let frame = self
            .txns
            .pop()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))?;
        match frame.txn.commit() {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(conn = %self.connection, error = %err, "commit failed, rolling back catalog");
                frame.ledger.apply();
                Err(err.into())
            }
        }
    }

    /// Aborts the innermost transaction, applying its rollback ledger first.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the abort fails.
    pub fn abort(&mut self) -> CoreResult<()> {
        let frame = self
            .txns
            .pop()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))?;
        if !frame.ledger.is_empty() {
            tracing::debug!(conn = %self.connection, ledger = ?frame.ledger, "applying rollback ledger");
        }
        frame.ledger.apply();
        frame.txn.abort()?;
        Ok(())
    }

    /// Runs `f` in a fresh writable transaction, isolated from the current
    /// transaction stack.
    ///
    /// The transaction commits if `f` succeeds and aborts otherwise; the
    /// caller's stack is restored either way.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of the commit.
    pub fn with_alternate_txn<T>(
        &mut self,
        env: &Environment,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let saved = std::mem::take(&mut self.txns);
        self.begin(env, false);
        let result = f(self);
        let finished = match &result {
            Ok(_) => self.commit(),
            Err(_) => self.abort(),
        };
        self.abort_all();
        self.txns = saved;
        let value = result?;
        finished?;
        Ok(value)
    }

    fn abort_all(&mut self) {
        while !self.txns.is_empty() {
            if let Err(err) = self.abort() {
                tracing::warn!(conn = %self.connection, error = %err, "abort failed");
            }
        }
    }

    // === Interruption ===

    /// Returns the flag that interrupts this operation when set.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Requests interruption of this operation.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Clears a previous interrupt request.
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
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

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held: Vec<(&str, LockLevel)> = self
            .held
            .values()
            .map(|g| (g.resource(), g.level()))
            .collect();
        f.debug_struct("OperationContext")
            .field("connection", &self.connection)
            .field("held", &held)
            .field("txn_depth", &self.txns.len())
            .finish_non_exhaustive()
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        if !self.txns.is_empty() {
            tracing::debug!(conn = %self.connection, depth = self.txns.len(), "aborting transactions of dropped context");
            self.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_storage::{EnvConfig, LockMode, PutMode};
    use std::time::Duration;

    fn setup() -> (Environment, OperationContext) {
        let env = Environment::in_memory(EnvConfig::default());
        let locks = Arc::new(LockManager::new(Duration::from_millis(50)));
        (env, OperationContext::new(ConnectionId(1), locks))
    }

    #[test]
    fn lock_assertions() {
        let (_env, mut ctx) = setup();
        assert!(matches!(
            ctx.assert_at_least_read_locked("test.users"),
            Err(CoreError::LockNotHeld { required: "read", .. })
        ));

        ctx.lock_shared("test").unwrap();
        assert!(ctx.assert_at_least_read_locked("test.users").is_ok());
        assert!(!ctx.is_write_locked("test"));
        assert!(ctx.assert_write_locked("test.users").is_err());

        ctx.lock_exclusive("test").unwrap();
        assert!(ctx.is_write_locked("test.users"));
        assert!(ctx.assert_write_locked("test").is_ok());

        ctx.unlock_all();
        assert_eq!(ctx.lock_level("test"), None);
    }

    #[test]
    fn exclusive_lock_blocks_other_contexts() {
        let (_env, mut a) = setup();
        let mut b = OperationContext::new(ConnectionId(2), Arc::clone(a.lock_manager()));
        a.lock_exclusive("test").unwrap();
        assert!(matches!(b.lock_shared("test"), Err(CoreError::LockTimeout { .. })));
        a.unlock("test");
        assert!(b.lock_shared("test").is_ok());
    }

    #[test]
    fn commit_and_abort_pop_the_stack() {
        let (env, mut ctx) = setup();
        assert!(ctx.txn().is_err());

        ctx.begin(&env, false);
        let dict = env.open(ctx.txn().unwrap(), "test.ns", true).unwrap();
        dict.put(ctx.txn().unwrap(), b"k", b"v", PutMode::Overwrite).unwrap();
        ctx.commit().unwrap();
        assert!(!ctx.has_txn());

        ctx.begin(&env, false);
        dict.put(ctx.txn().unwrap(), b"k", b"other", PutMode::Overwrite).unwrap();
        ctx.abort().unwrap();

        ctx.begin(&env, true);
        let value = dict.get(ctx.txn().unwrap(), b"k", LockMode::Read).unwrap();
        assert_eq!(value.as_deref(), Some(&b"v"[..]));
        assert!(ctx.commit().is_ok());
        assert!(ctx.commit().is_err());
    }

    #[test]
    fn alternate_txn_is_isolated() {
        let (env, mut ctx) = setup();
        ctx.begin(&env, true);
        let outer = ctx.txn().unwrap().id();

        let inner = ctx
            .with_alternate_txn(&env, |ctx| {
                let txn = ctx.txn()?;
                assert!(!txn.is_read_only());
                let dict = env.open(txn, "test.ns", true)?;
                dict.put(txn, b"k", b"v", PutMode::Overwrite)?;
                Ok(txn.id())
            })
            .unwrap();

        assert_ne!(inner, outer);
        assert_eq!(ctx.txn().unwrap().id(), outer);
        assert!(env.exists("test.ns"));
    }

    #[test]
    fn alternate_txn_aborts_on_error() {
        let (env, mut ctx) = setup();
        let result: CoreResult<()> = ctx.with_alternate_txn(&env, |ctx| {
            env.open(ctx.txn()?, "test.ns", true)?;
            Err(CoreError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert!(!env.exists("test.ns"));
        assert!(!ctx.has_txn());
    }

    #[test]
    fn interrupt_flag() {
        let (_env, ctx) = setup();
        assert!(ctx.check_for_interrupt().is_ok());
        ctx.interrupt();
        assert!(matches!(ctx.check_for_interrupt(), Err(CoreError::Interrupted)));
        assert!(ctx.interrupt_handle().load(Ordering::SeqCst));
        ctx.clear_interrupt();
        assert!(ctx.check_for_interrupt().is_ok());
    }

    #[test]
    fn drop_aborts_open_transactions() {
        let (env, mut ctx) = setup();
        ctx.begin(&env, false);
        env.open(ctx.txn().unwrap(), "test.ns", true).unwrap();
        drop(ctx);
        assert!(!env.exists("test.ns"));
    }
}
