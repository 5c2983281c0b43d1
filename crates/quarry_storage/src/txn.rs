//! Storage transactions.

use crate::dictionary::DictionaryInner;
use crate::env::EnvShared;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A storage transaction.
///
/// Writes take row locks that are held until [`Transaction::commit`] or
/// [`Transaction::abort`]. Dictionaries created inside the transaction are
/// removed if it aborts; dictionaries removed inside it disappear at commit.
/// Dropping an active transaction aborts it.
pub struct Transaction {
    env: Arc<EnvShared>,
    id: TxnId,
    snapshot: u64,
    read_only: bool,
    state: Mutex<TxnState>,
    touched: Mutex<Vec<Arc<DictionaryInner>>>,
    created: Mutex<Vec<Arc<DictionaryInner>>>,
    removed: Mutex<Vec<Arc<DictionaryInner>>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("read_only", &self.read_only)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(env: Arc<EnvShared>, id: TxnId, snapshot: u64, read_only: bool) -> Self {
        Self {
            env,
            id,
            snapshot,
            read_only,
            state: Mutex::new(TxnState::Active),
            touched: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the commit sequence this transaction reads from.
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Returns true if the transaction may not write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    /// Commits the transaction and returns its commit sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active or a dictionary log
    /// cannot be written. On a write failure the transaction is aborted.
    pub fn commit(self) -> StorageResult<u64> {
        self.ensure_active()?;
        let guard = self.env.commit_lock.lock();
        let sequence = self.env.next_commit_seq();

        let touched = std::mem::take(&mut *self.touched.lock());
        for (index, dictionary) in touched.iter().enumerate() {
            if let Err(err) = dictionary.commit(self.id) {
                tracing::error!(txn = %self.id, dictionary = dictionary.name(), error = %err, "commit failed");
                for rest in &touched[index..] {
                    rest.rollback(self.id);
                }
                drop(guard);
                self.finish_abort();
                return Err(err);
            }
        }

        for dictionary in self.created.lock().drain(..) {
            dictionary.created_seq.store(sequence, std::sync::atomic::Ordering::SeqCst);
            *dictionary.creator.lock() = None;
        }
        for dictionary in self.removed.lock().drain(..) {
            self.env.unregister(&dictionary)?;
        }

        self.env.publish_commit(sequence);
        drop(guard);
        *self.state.lock() = TxnState::Committed;
        tracing::debug!(txn = %self.id, sequence, "committed");
        Ok(sequence)
    }

    /// Aborts the transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active.
    pub fn abort(self) -> StorageResult<()> {
        self.ensure_active()?;
        for dictionary in self.touched.lock().drain(..) {
            dictionary.rollback(self.id);
        }
        self.finish_abort();
        Ok(())
    }

    fn finish_abort(&self) {
        for dictionary in self.created.lock().drain(..) {
            if let Err(err) = self.env.unregister(&dictionary) {
                tracing::warn!(
                    txn = %self.id,
                    dictionary = dictionary.name(),
                    error = %err,
                    "failed to remove dictionary created by aborted transaction"
                );
            }
        }
        for dictionary in self.removed.lock().drain(..) {
            *dictionary.removed_by.lock() = None;
        }
        *self.state.lock() = TxnState::Aborted;
        tracing::debug!(txn = %self.id, "aborted");
    }

    pub(crate) fn ensure_active(&self) -> StorageResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StorageError::TransactionInactive { txn: self.id.0 })
        }
    }

    pub(crate) fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(StorageError::ReadOnly { txn: self.id.0 });
        }
        Ok(())
    }

    pub(crate) fn touch(&self, dictionary: &Arc<DictionaryInner>) {
        let mut touched = self.touched.lock();
        if !touched.iter().any(|d| Arc::ptr_eq(d, dictionary)) {
            touched.push(Arc::clone(dictionary));
        }
    }

    pub(crate) fn note_created(&self, dictionary: &Arc<DictionaryInner>) {
        self.created.lock().push(Arc::clone(dictionary));
    }

    pub(crate) fn note_removed(&self, dictionary: &Arc<DictionaryInner>) {
        self.removed.lock().push(Arc::clone(dictionary));
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!(txn = %self.id, "aborting dropped transaction");
            for dictionary in self.touched.lock().drain(..) {
                dictionary.rollback(self.id);
            }
            self.finish_abort();
        }
    }
}
