//! Storage environment: the set of dictionaries and the transactions over them.

use crate::backend::StorageBackend;
use crate::dictionary::{Dictionary, DictionaryInner, UNCOMMITTED_SEQ};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::MemoryBackend;
use crate::txn::{Transaction, TxnId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a storage environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Upper bound on a row lock wait.
    pub lock_timeout: Duration,
    /// Whether to sync dictionary logs on every commit.
    pub sync_on_commit: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            sync_on_commit: true,
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row lock wait bound.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

enum Location {
    Memory(Mutex<HashMap<String, Arc<RwLock<Vec<u8>>>>>),
    Directory(PathBuf),
}

pub(crate) struct EnvShared {
    config: EnvConfig,
    location: Location,
    registry: Mutex<HashMap<String, Arc<DictionaryInner>>>,
    next_txn: AtomicU64,
    committed_seq: AtomicU64,
    pub(crate) commit_lock: Mutex<()>,
}

impl EnvShared {
    pub(crate) fn next_commit_seq(&self) -> u64 {
        self.committed_seq.load(Ordering::SeqCst) + 1
    }

    pub(crate) fn publish_commit(&self, sequence: u64) {
        self.committed_seq.store(sequence, Ordering::SeqCst);
    }

    /// Forgets a dictionary and deletes its backing log.
    pub(crate) fn unregister(&self, dictionary: &Arc<DictionaryInner>) -> StorageResult<()> {
        dictionary.mark_removed();
        let mut registry = self.registry.lock();
        if registry
            .get(dictionary.name())
            .is_some_and(|current| Arc::ptr_eq(current, dictionary))
        {
            registry.remove(dictionary.name());
        }
        drop(registry);
        self.delete_backing(dictionary.name())
    }

    fn backing_exists(&self, name: &str) -> bool {
        match &self.location {
            Location::Memory(files) => files.lock().contains_key(name),
            Location::Directory(dir) => dir.join(name).is_file(),
        }
    }

    fn open_backing(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        match &self.location {
            Location::Memory(files) => {
                let buffer = Arc::clone(files.lock().entry(name.to_string()).or_default());
                Ok(Box::new(MemoryBackend::shared(buffer)))
            }
            Location::Directory(dir) => Ok(Box::new(FileBackend::open(&dir.join(name))?)),
        }
    }

    fn delete_backing(&self, name: &str) -> StorageResult<()> {
        match &self.location {
            Location::Memory(files) => {
                files.lock().remove(name);
                Ok(())
            }
            Location::Directory(dir) => match fs::remove_file(dir.join(name)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }
}

/// A storage environment.
///
/// The environment owns every dictionary in one location (a directory or
/// memory) and hands out transactions over them. Cloning is cheap; clones
/// share state.
///
/// # Example
///
/// ```rust
/// use quarry_storage::{EnvConfig, Environment, LockMode, PutMode};
///
/// let env = Environment::in_memory(EnvConfig::default());
/// let txn = env.begin(false);
/// let dict = env.open(&txn, "test.ns", true).unwrap();
/// dict.put(&txn, b"test.users", b"descriptor", PutMode::NoOverwrite).unwrap();
/// txn.commit().unwrap();
///
/// let txn = env.begin(true);
/// let value = dict.get(&txn, b"test.users", LockMode::Read).unwrap();
/// assert_eq!(value.as_deref(), Some(&b"descriptor"[..]));
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = match &self.shared.location {
            Location::Memory(_) => "memory".to_string(),
            Location::Directory(dir) => dir.display().to_string(),
        };
        f.debug_struct("Environment")
            .field("location", &location)
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an environment whose dictionaries live in memory.
    #[must_use]
    pub fn in_memory(config: EnvConfig) -> Self {
        Self::with_location(config, Location::Memory(Mutex::new(HashMap::new())))
    }

    /// Opens an environment over a directory, creating it if needed.
    ///
    /// Each dictionary is one file in the directory, named after the dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_dir(path: &Path, config: EnvConfig) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        Ok(Self::with_location(
            config,
            Location::Directory(path.to_path_buf()),
        ))
    }

    fn with_location(config: EnvConfig, location: Location) -> Self {
        Self {
            shared: Arc::new(EnvShared {
                config,
                location,
                registry: Mutex::new(HashMap::new()),
                next_txn: AtomicU64::new(1),
                committed_seq: AtomicU64::new(0),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the sequence of the last committed transaction.
    #[must_use]
    pub fn committed_seq(&self) -> u64 {
        self.shared.committed_seq.load(Ordering::SeqCst)
    }

    /// Begins a transaction reading from the latest committed state.
    #[must_use]
    pub fn begin(&self, read_only: bool) -> Transaction {
        let id = TxnId(self.shared.next_txn.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.committed_seq();
        Transaction::new(Arc::clone(&self.shared), id, snapshot, read_only)
    }

    /// Opens the dictionary called `name`.
    ///
    /// If the dictionary does not exist it is created when `may_create` is
    /// true, inside `txn`: aborting `txn` removes it again.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NeedsCreate`] if it does not exist and `may_create` is false
    /// - [`StorageError::DictionaryTooNew`] if it was created after `txn`'s
    ///   snapshot, or by another transaction that has not committed
    /// - [`StorageError::InvalidName`] if `name` cannot be a file name
    pub fn open(&self, txn: &Transaction, name: &str, may_create: bool) -> StorageResult<Dictionary> {
        validate_name(name)?;
        txn.ensure_active()?;
        let shared = &self.shared;
        let mut registry = shared.registry.lock();

        if let Some(inner) = registry.get(name) {
            if *inner.removed_by.lock() == Some(txn.id()) {
                return Err(if may_create {
                    StorageError::Closed {
                        name: name.to_string(),
                    }
                } else {
                    StorageError::NeedsCreate {
                        name: name.to_string(),
                    }
                });
            }
            let creator = *inner.creator.lock();
            let visible = match creator {
                Some(owner) => owner == txn.id(),
                None => inner.created_seq.load(Ordering::SeqCst) <= txn.snapshot(),
            };
            if !visible {
                return Err(StorageError::DictionaryTooNew {
                    name: name.to_string(),
                });
            }
            return Ok(Dictionary::new(Arc::clone(inner)));
        }

        if shared.backing_exists(name) {
            let backend = shared.open_backing(name)?;
            let inner = Arc::new(DictionaryInner::load(
                name,
                backend,
                0,
                None,
                shared.config.lock_timeout,
                shared.config.sync_on_commit,
            )?);
            registry.insert(name.to_string(), Arc::clone(&inner));
            tracing::debug!(dictionary = name, "opened dictionary");
            return Ok(Dictionary::new(inner));
        }

        if !may_create {
            return Err(StorageError::NeedsCreate {
                name: name.to_string(),
            });
        }
        txn.ensure_writable()?;

        let backend = shared.open_backing(name)?;
        let inner = Arc::new(DictionaryInner::load(
            name,
            backend,
            UNCOMMITTED_SEQ,
            Some(txn.id()),
            shared.config.lock_timeout,
            shared.config.sync_on_commit,
        )?);
        registry.insert(name.to_string(), Arc::clone(&inner));
        txn.note_created(&inner);
        tracing::debug!(dictionary = name, txn = %txn.id(), "created dictionary");
        Ok(Dictionary::new(inner))
    }

    /// Removes the dictionary called `name` when `txn` commits.
    ///
    /// From `txn`'s point of view the dictionary is gone immediately; if
    /// `txn` aborts nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary does not exist or `txn` cannot write.
    pub fn remove(&self, txn: &Transaction, name: &str) -> StorageResult<()> {
        txn.ensure_writable()?;
        let dictionary = self.open(txn, name, false)?;
        let inner = dictionary.inner();
        *inner.removed_by.lock() = Some(txn.id());
        txn.note_removed(inner);
        tracing::debug!(dictionary = name, txn = %txn.id(), "scheduled dictionary removal");
        Ok(())
    }

    /// Returns true if a dictionary called `name` exists in storage.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.shared.registry.lock().contains_key(name) || self.shared.backing_exists(name)
    }

    /// Returns the directory backing this environment, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.shared.location {
            Location::Memory(_) => None,
            Location::Directory(dir) => Some(dir),
        }
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{LockMode, PutMode};
    use std::thread;
    use tempfile::tempdir;

    fn env() -> Environment {
        Environment::in_memory(EnvConfig::default())
    }

    #[test]
    fn missing_dictionary_needs_create() {
        let env = env();
        let txn = env.begin(false);
        let err = env.open(&txn, "test.ns", false).unwrap_err();
        assert!(matches!(err, StorageError::NeedsCreate { .. }));
    }

    #[test]
    fn read_only_transaction_cannot_create() {
        let env = env();
        let txn = env.begin(true);
        let err = env.open(&txn, "test.ns", true).unwrap_err();
        assert!(matches!(err, StorageError::ReadOnly { .. }));
    }

    #[test]
    fn abort_removes_created_dictionary() {
        let env = env();
        let txn = env.begin(false);
        env.open(&txn, "test.ns", true).unwrap();
        assert!(env.exists("test.ns"));
        txn.abort().unwrap();
        assert!(!env.exists("test.ns"));
    }

    #[test]
    fn dropped_transaction_aborts() {
        let env = env();
        {
            let txn = env.begin(false);
            let dict = env.open(&txn, "d", true).unwrap();
            dict.put(&txn, b"k", b"v", PutMode::Overwrite).unwrap();
        }
        assert!(!env.exists("d"));
    }

    #[test]
    fn pending_writes_are_private_until_commit() {
        let env = env();
        let setup = env.begin(false);
        let dict = env.open(&setup, "d", true).unwrap();
        setup.commit().unwrap();

        let writer = env.begin(false);
        dict.put(&writer, b"k", b"v", PutMode::Overwrite).unwrap();

        let reader = env.begin(true);
        assert_eq!(dict.get(&reader, b"k", LockMode::Read).unwrap(), None);
        assert_eq!(
            dict.get(&writer, b"k", LockMode::Read).unwrap(),
            Some(b"v".to_vec())
        );

        writer.commit().unwrap();
        assert_eq!(
            dict.get(&reader, b"k", LockMode::Read).unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn no_overwrite_rejects_existing_row() {
        let env = env();
        let txn = env.begin(false);
        let dict = env.open(&txn, "d", true).unwrap();
        dict.put(&txn, b"k", b"1", PutMode::NoOverwrite).unwrap();
        let err = dict.put(&txn, b"k", b"2", PutMode::NoOverwrite).unwrap_err();
        assert!(matches!(err, StorageError::KeyExists { .. }));
        dict.put(&txn, b"k", b"2", PutMode::Overwrite).unwrap();
        assert_eq!(dict.get(&txn, b"k", LockMode::Read).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_then_cursor_skips_row() {
        let env = env();
        let txn = env.begin(false);
        let dict = env.open(&txn, "d", true).unwrap();
        for key in [b"a", b"b", b"c"] {
            dict.put(&txn, key, key, PutMode::Overwrite).unwrap();
        }
        dict.delete(&txn, b"b").unwrap();
        let keys: Vec<Vec<u8>> = dict.cursor(&txn).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(dict.last_key(&txn).unwrap(), Some(b"c".to_vec()));
    }

    #[test]
    fn dictionary_created_after_snapshot_is_too_new() {
        let env = env();
        let old = env.begin(false);

        let creator = env.begin(false);
        env.open(&creator, "late", true).unwrap();
        let err = env.open(&old, "late", false).unwrap_err();
        assert!(matches!(err, StorageError::DictionaryTooNew { .. }));
        creator.commit().unwrap();

        let err = env.open(&old, "late", false).unwrap_err();
        assert!(err.is_retryable());

        let fresh = env.begin(false);
        env.open(&fresh, "late", false).unwrap();
    }

    #[test]
    fn row_lock_serializes_writers() {
        let env = Environment::in_memory(EnvConfig::new().lock_timeout(Duration::from_millis(50)));
        let setup = env.begin(false);
        let dict = env.open(&setup, "d", true).unwrap();
        setup.commit().unwrap();

        let first = env.begin(false);
        dict.get(&first, b"row", LockMode::ReadModifyWrite).unwrap();

        let second = env.begin(false);
        let err = dict.get(&second, b"row", LockMode::ReadModifyWrite).unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        first.commit().unwrap();
        dict.get(&second, b"row", LockMode::ReadModifyWrite).unwrap();
    }

    #[test]
    fn row_lock_waiter_wakes_on_commit() {
        let env = env();
        let setup = env.begin(false);
        let dict = env.open(&setup, "d", true).unwrap();
        setup.commit().unwrap();

        let holder = env.begin(false);
        dict.put(&holder, b"row", b"1", PutMode::Overwrite).unwrap();

        let waiter = {
            let env = env.clone();
            let dict = dict.clone();
            thread::spawn(move || {
                let txn = env.begin(false);
                let value = dict.get(&txn, b"row", LockMode::ReadModifyWrite).unwrap();
                txn.commit().unwrap();
                value
            })
        };

        thread::sleep(Duration::from_millis(20));
        holder.commit().unwrap();
        assert_eq!(waiter.join().unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn remove_takes_effect_at_commit() {
        let env = env();
        let txn = env.begin(false);
        env.open(&txn, "gone", true).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(false);
        env.remove(&txn, "gone").unwrap();
        assert!(matches!(
            env.open(&txn, "gone", false).unwrap_err(),
            StorageError::NeedsCreate { .. }
        ));
        assert!(env.exists("gone"));
        txn.commit().unwrap();
        assert!(!env.exists("gone"));
    }

    #[test]
    fn aborted_remove_keeps_dictionary() {
        let env = env();
        let txn = env.begin(false);
        env.open(&txn, "kept", true).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(false);
        env.remove(&txn, "kept").unwrap();
        txn.abort().unwrap();

        let txn = env.begin(false);
        env.open(&txn, "kept", false).unwrap();
    }

    #[test]
    fn invalid_names_rejected() {
        let env = env();
        let txn = env.begin(false);
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                env.open(&txn, name, true).unwrap_err(),
                StorageError::InvalidName { .. }
            ));
        }
    }

    mod persistence_tests {
        use super::*;

        #[test]
        fn committed_rows_survive_reopen() {
            let dir = tempdir().unwrap();
            {
                let env = Environment::open_dir(dir.path(), EnvConfig::default()).unwrap();
                let txn = env.begin(false);
                let dict = env.open(&txn, "test.ns", true).unwrap();
                dict.put(&txn, b"test.a", b"1", PutMode::Overwrite).unwrap();
                dict.put(&txn, b"test.b", b"2", PutMode::Overwrite).unwrap();
                txn.commit().unwrap();

                let txn = env.begin(false);
                dict.delete(&txn, b"test.a").unwrap();
                txn.commit().unwrap();

                let txn = env.begin(false);
                dict.put(&txn, b"test.c", b"3", PutMode::Overwrite).unwrap();
                txn.abort().unwrap();
            }

            let env = Environment::open_dir(dir.path(), EnvConfig::default()).unwrap();
            let txn = env.begin(true);
            let dict = env.open(&txn, "test.ns", false).unwrap();
            let rows: Vec<(Vec<u8>, Vec<u8>)> = dict.cursor(&txn).unwrap().collect();
            assert_eq!(rows, vec![(b"test.b".to_vec(), b"2".to_vec())]);
        }

        #[test]
        fn removed_dictionary_file_is_deleted() {
            let dir = tempdir().unwrap();
            let env = Environment::open_dir(dir.path(), EnvConfig::default()).unwrap();
            let txn = env.begin(false);
            env.open(&txn, "test.ns", true).unwrap();
            txn.commit().unwrap();
            assert!(dir.path().join("test.ns").exists());

            let txn = env.begin(false);
            env.remove(&txn, "test.ns").unwrap();
            txn.commit().unwrap();
            assert!(!dir.path().join("test.ns").exists());
        }

        #[test]
        fn aborted_create_deletes_file() {
            let dir = tempdir().unwrap();
            let env = Environment::open_dir(dir.path(), EnvConfig::default()).unwrap();
            let txn = env.begin(false);
            env.open(&txn, "test.ns", true).unwrap();
            assert!(dir.path().join("test.ns").exists());
            txn.abort().unwrap();
            assert!(!dir.path().join("test.ns").exists());
        }
    }
}
