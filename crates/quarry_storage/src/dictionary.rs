//! Named, ordered, transactional key-value dictionaries.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::log::{self, Mutation};
use crate::txn::{Transaction, TxnId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Creation sequence of a dictionary whose creating transaction has not committed.
pub(crate) const UNCOMMITTED_SEQ: u64 = u64::MAX;

/// How a point read treats the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read of the visible value.
    Read,
    /// Serializable read-modify-write: take the row lock, then read.
    ///
    /// The lock is held until the transaction commits or aborts.
    ReadModifyWrite,
}

/// Whether a put may replace an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing value.
    Overwrite,
    /// Fail with [`StorageError::KeyExists`] if the row is present.
    NoOverwrite,
}

#[derive(Debug, Default)]
struct Slot {
    committed: Option<Vec<u8>>,
    pending: Option<(TxnId, Option<Vec<u8>>)>,
}

impl Slot {
    fn visible(&self, txn: TxnId) -> Option<&Vec<u8>> {
        match &self.pending {
            Some((owner, value)) if *owner == txn => value.as_ref(),
            _ => self.committed.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.committed.is_none() && self.pending.is_none()
    }
}

/// Shared state of one dictionary.
pub(crate) struct DictionaryInner {
    name: String,
    lock_timeout: Duration,
    sync_on_commit: bool,
    pub(crate) created_seq: AtomicU64,
    pub(crate) creator: Mutex<Option<TxnId>>,
    pub(crate) removed_by: Mutex<Option<TxnId>>,
    removed: AtomicBool,
    rows: RwLock<BTreeMap<Vec<u8>, Slot>>,
    row_locks: Mutex<HashMap<Vec<u8>, TxnId>>,
    released: Condvar,
    backend: Mutex<Box<dyn StorageBackend>>,
}

impl std::fmt::Debug for DictionaryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryInner")
            .field("name", &self.name)
            .field("created_seq", &self.created_seq)
            .finish_non_exhaustive()
    }
}

impl DictionaryInner {
    /// Builds a dictionary by replaying its log.
    pub(crate) fn load(
        name: &str,
        mut backend: Box<dyn StorageBackend>,
        created_seq: u64,
        creator: Option<TxnId>,
        lock_timeout: Duration,
        sync_on_commit: bool,
    ) -> StorageResult<Self> {
        let data = backend.read_all()?;
        let replay = log::replay(&data);
        if replay.valid_len < data.len() as u64 {
            tracing::warn!(
                dictionary = name,
                valid = replay.valid_len,
                size = data.len(),
                "truncating torn tail of dictionary log"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut rows = BTreeMap::new();
        for frame in replay.frames {
            for Mutation { key, value } in frame {
                match value {
                    Some(value) => {
                        rows.insert(
                            key,
                            Slot {
                                committed: Some(value),
                                pending: None,
                            },
                        );
                    }
                    None => {
                        rows.remove(&key);
                    }
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            lock_timeout,
            sync_on_commit,
            created_seq: AtomicU64::new(created_seq),
            creator: Mutex::new(creator),
            removed_by: Mutex::new(None),
            removed: AtomicBool::new(false),
            rows: RwLock::new(rows),
            row_locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            backend: Mutex::new(backend),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    fn locked_keys(&self, txn: TxnId) -> Vec<Vec<u8>> {
        self.row_locks
            .lock()
            .iter()
            .filter(|(_, owner)| **owner == txn)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Makes `txn`'s pending rows durable and visible, then releases its row locks.
    pub(crate) fn commit(&self, txn: TxnId) -> StorageResult<()> {
        let keys = self.locked_keys(txn);
        {
            let mut rows = self.rows.write();
            let mutations: Vec<Mutation> = keys
                .iter()
                .filter_map(|key| {
                    let slot = rows.get(key)?;
                    match &slot.pending {
                        Some((owner, value)) if *owner == txn => Some(Mutation {
                            key: key.clone(),
                            value: value.clone(),
                        }),
                        _ => None,
                    }
                })
                .collect();

            if !mutations.is_empty() {
                let frame = log::encode_frame(&mutations)?;
                let mut backend = self.backend.lock();
                backend.append(&frame)?;
                if self.sync_on_commit {
                    backend.sync()?;
                }
            }

            for key in &keys {
                if let Some(slot) = rows.get_mut(key) {
                    if matches!(&slot.pending, Some((owner, _)) if *owner == txn) {
                        if let Some((_, value)) = slot.pending.take() {
                            slot.committed = value;
                        }
                    }
                    if slot.is_empty() {
                        rows.remove(key);
                    }
                }
            }
        }
        self.release_locks(txn);
        Ok(())
    }

    /// Discards `txn`'s pending rows and releases its row locks.
    pub(crate) fn rollback(&self, txn: TxnId) {
        let keys = self.locked_keys(txn);
        {
            let mut rows = self.rows.write();
            for key in &keys {
                if let Some(slot) = rows.get_mut(key) {
                    if matches!(&slot.pending, Some((owner, _)) if *owner == txn) {
                        slot.pending = None;
                    }
                    if slot.is_empty() {
                        rows.remove(key);
                    }
                }
            }
        }
        self.release_locks(txn);
    }

    fn release_locks(&self, txn: TxnId) {
        let mut locks = self.row_locks.lock();
        locks.retain(|_, owner| *owner != txn);
        drop(locks);
        self.released.notify_all();
    }
}

/// A handle to an open dictionary.
///
/// Handles are cheap to clone and may be shared across threads. Every
/// operation runs inside the transaction passed to it.
#[derive(Debug, Clone)]
pub struct Dictionary {
    inner: Arc<DictionaryInner>,
}

impl Dictionary {
    pub(crate) fn new(inner: Arc<DictionaryInner>) -> Self {
        Self { inner }
    }

    /// Returns the dictionary name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Reads the value stored under `key`.
    ///
    /// With [`LockMode::ReadModifyWrite`] the row lock is taken first, so
    /// concurrent callers using the same key serialize on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is inactive, the lock wait times
    /// out, or the dictionary was closed.
    pub fn get(
        &self,
        txn: &Transaction,
        key: &[u8],
        mode: LockMode,
    ) -> StorageResult<Option<Vec<u8>>> {
        self.check_usable(txn)?;
        if mode == LockMode::ReadModifyWrite {
            txn.ensure_writable()?;
            self.lock_row(txn, key)?;
        }
        let rows = self.inner.rows.read();
        Ok(rows.get(key).and_then(|slot| slot.visible(txn.id())).cloned())
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KeyExists`] for a [`PutMode::NoOverwrite`] put
    /// over a visible row, or an error if the transaction cannot write.
    pub fn put(
        &self,
        txn: &Transaction,
        key: &[u8],
        value: &[u8],
        mode: PutMode,
    ) -> StorageResult<()> {
        self.check_usable(txn)?;
        txn.ensure_writable()?;
        self.lock_row(txn, key)?;

        let mut rows = self.inner.rows.write();
        let slot = rows.entry(key.to_vec()).or_default();
        if mode == PutMode::NoOverwrite && slot.visible(txn.id()).is_some() {
            return Err(StorageError::KeyExists {
                name: self.inner.name.clone(),
            });
        }
        slot.pending = Some((txn.id(), Some(value.to_vec())));
        Ok(())
    }

    /// Deletes `key`. Deleting a missing row is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot write.
    pub fn delete(&self, txn: &Transaction, key: &[u8]) -> StorageResult<()> {
        self.check_usable(txn)?;
        txn.ensure_writable()?;
        self.lock_row(txn, key)?;

        let mut rows = self.inner.rows.write();
        let slot = rows.entry(key.to_vec()).or_default();
        slot.pending = Some((txn.id(), None));
        Ok(())
    }

    /// Returns a cursor over the rows visible to `txn`, in key order.
    ///
    /// The cursor is a point-in-time copy; it does not hold locks and does
    /// not observe later changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is inactive or the dictionary was closed.
    pub fn cursor(&self, txn: &Transaction) -> StorageResult<DictionaryCursor> {
        self.check_usable(txn)?;
        let rows = self.inner.rows.read();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = rows
            .iter()
            .filter_map(|(key, slot)| slot.visible(txn.id()).map(|v| (key.clone(), v.clone())))
            .collect();
        Ok(DictionaryCursor {
            entries: entries.into_iter(),
        })
    }

    /// Returns the greatest key visible to `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is inactive or the dictionary was closed.
    pub fn last_key(&self, txn: &Transaction) -> StorageResult<Option<Vec<u8>>> {
        self.check_usable(txn)?;
        let rows = self.inner.rows.read();
        Ok(rows
            .iter()
            .rev()
            .find(|(_, slot)| slot.visible(txn.id()).is_some())
            .map(|(key, _)| key.clone()))
    }

    /// Releases this handle.
    ///
    /// Committed rows stay in the dictionary's log; a later open replays them.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the dictionary was already removed.
    pub fn close(self) -> StorageResult<()> {
        if self.inner.removed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                name: self.inner.name.clone(),
            });
        }
        tracing::trace!(dictionary = %self.inner.name, "closed dictionary handle");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Arc<DictionaryInner> {
        &self.inner
    }

    fn check_usable(&self, txn: &Transaction) -> StorageResult<()> {
        txn.ensure_active()?;
        let removed_by_txn = *self.inner.removed_by.lock() == Some(txn.id());
        if removed_by_txn || self.inner.removed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed {
                name: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    fn lock_row(&self, txn: &Transaction, key: &[u8]) -> StorageResult<()> {
        let started = Instant::now();
        let deadline = started + self.inner.lock_timeout;
        let mut locks = self.inner.row_locks.lock();
        loop {
            match locks.get(key) {
                None => {
                    locks.insert(key.to_vec(), txn.id());
                    drop(locks);
                    txn.touch(&self.inner);
                    return Ok(());
                }
                Some(owner) if *owner == txn.id() => return Ok(()),
                Some(_) => {
                    if self.inner.released.wait_until(&mut locks, deadline).timed_out() {
                        return Err(StorageError::LockTimeout {
                            name: self.inner.name.clone(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }
}

/// Ordered iterator over `(key, value)` rows.
#[derive(Debug)]
pub struct DictionaryCursor {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for DictionaryCursor {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
