//! Open collection handles.
//!
//! A collection's documents live in their own dictionary, named
//! `<ns>$data`, keyed by a big-endian insertion counter so a cursor returns
//! them in insertion order. Documents are stored as CBOR.

mod descriptor;

pub use descriptor::{CollectionDescriptor, IndexSpec, ID_INDEX_NAME};

use crate::error::{CoreError, CoreResult};
use crate::types::{ConnectionId, Namespace};
use parking_lot::Mutex;
use quarry_codec::{Decode, Document, Encode, Value};
use quarry_storage::{Dictionary, DictionaryCursor, Environment, PutMode, StorageError, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Returns the name of the dictionary holding the documents of `ns`.
#[must_use]
pub fn data_dictionary_name(ns: &str) -> String {
    format!("{ns}$data")
}

/// Lifecycle of a collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// Closed; the handle must not be used.
    Closed,
    /// Being constructed from its metadata.
    Opening,
    /// Usable.
    Open,
}

/// An open collection.
///
/// Handles are shared between the catalog cache and any cursor reading
/// from them; a handle stays valid while a cursor holds it even after the
/// catalog closes it.
#[derive(Debug)]
pub struct Collection {
    ns: Namespace,
    descriptor: CollectionDescriptor,
    data: Dictionary,
    bulk_loader: Option<ConnectionId>,
    next_id: AtomicU64,
    state: Mutex<OpenState>,
}

impl Collection {
    /// Creates the data dictionary for a new collection inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary cannot be created.
    pub fn create_data(env: &Environment, txn: &Transaction, ns: &Namespace) -> CoreResult<()> {
        env.open(txn, &data_dictionary_name(ns.as_str()), true)?;
        Ok(())
    }

    /// Constructs a handle from a serialized descriptor.
    ///
    /// `bulk_loader` marks the handle as owned by one connection for a
    /// bulk load.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the descriptor is corrupt or the data
    /// dictionary is missing, and [`CoreError::SnapshotTooNew`] if the data
    /// dictionary is not visible to `txn`.
    pub fn make(
        env: &Environment,
        txn: &Transaction,
        ns: &Namespace,
        descriptor_bytes: &[u8],
        bulk_loader: Option<ConnectionId>,
    ) -> CoreResult<Self> {
        let descriptor = CollectionDescriptor::decode(descriptor_bytes)
            .map_err(|e| CoreError::fatal(format!("corrupt metadata for {ns}: {e}")))?;
        if descriptor.ns != ns.as_str() {
            return Err(CoreError::fatal(format!(
                "metadata for {ns} describes {}",
                descriptor.ns
            )));
        }
        let state = Mutex::new(OpenState::Opening);

        let name = data_dictionary_name(ns.as_str());
        let data = env.open(txn, &name, false).map_err(|err| match err {
            StorageError::NeedsCreate { .. } => {
                CoreError::fatal(format!("data dictionary of {ns} is missing"))
            }
            StorageError::DictionaryTooNew { .. } => CoreError::SnapshotTooNew {
                ns: ns.to_string(),
            },
            other => other.into(),
        })?;
        let next_id = match data.last_key(txn)? {
            Some(key) => decode_row_key(&key)? + 1,
            None => 0,
        };

        *state.lock() = OpenState::Open;
        tracing::debug!(ns = %ns, next_id, bulk = bulk_loader.is_some(), "collection opened");
        Ok(Self {
            ns: ns.clone(),
            descriptor,
            data,
            bulk_loader,
            next_id: AtomicU64::new(next_id),
            state,
        })
    }

    /// Returns the namespace.
    #[must_use]
    pub fn ns(&self) -> &Namespace {
        &self.ns
    }

    /// Returns the metadata the handle was built from.
    #[must_use]
    pub fn descriptor(&self) -> &CollectionDescriptor {
        &self.descriptor
    }

    /// Returns the open state.
    #[must_use]
    pub fn state(&self) -> OpenState {
        *self.state.lock()
    }

    /// Returns true if the handle was opened for a bulk load.
    #[must_use]
    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_loader.is_some()
    }

    /// Returns the connection that owns the bulk load, if any.
    #[must_use]
    pub fn bulk_loader(&self) -> Option<ConnectionId> {
        self.bulk_loader
    }

    /// Checks that `connection` may use this handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BulkLoadConflict`] if another connection is bulk
    /// loading the collection.
    pub fn validate_connection(&self, connection: ConnectionId) -> CoreResult<()> {
        match self.bulk_loader {
            Some(owner) if owner != connection => Err(CoreError::BulkLoadConflict {
                ns: self.ns.to_string(),
                owner: owner.as_u64(),
            }),
            _ => Ok(()),
        }
    }

    /// Inserts a document, returning its `_id`.
    ///
    /// A document without `_id` gets a UUID string. `_id` is always stored
    /// as the first field.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the write fails.
    pub fn insert(&self, txn: &Transaction, doc: Document) -> CoreResult<Value> {
        self.ensure_open()?;
        let mut doc = doc;
        let id = doc
            .remove("_id")
            .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));
        let mut stored = Document::with_capacity(doc.len() + 1);
        stored.insert("_id", id.clone());
        for (name, value) in doc {
            stored.insert(name, value);
        }

        let key = self.next_id.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        self.data
            .put(txn, &key, &stored.encode()?, PutMode::NoOverwrite)?;
        Ok(id)
    }

    /// Returns a cursor over the documents visible to `txn`.
    ///
    /// The cursor keeps the handle alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the read fails.
    pub fn scan(self: &Arc<Self>, txn: &Transaction) -> CoreResult<CollectionScan> {
        self.ensure_open()?;
        let rows = self.data.cursor(txn)?;
        Ok(CollectionScan {
            collection: Arc::clone(self),
            rows,
        })
    }

    /// Deletes every document matching `predicate`, returning the count.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be decoded or deleted.
    pub fn remove_matching(
        &self,
        txn: &Transaction,
        predicate: impl Fn(&Document) -> bool,
    ) -> CoreResult<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        for (key, bytes) in self.data.cursor(txn)? {
            let doc = Document::decode(&bytes)?;
            if predicate(&doc) {
                self.data.delete(txn, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Counts the documents visible to `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is closed or the read fails.
    pub fn count(&self, txn: &Transaction) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.data.cursor(txn)?.count())
    }

    /// Closes the handle.
    ///
    /// A dictionary that was already removed is not an error. When
    /// `aborting`, close failures are logged instead of returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the data dictionary fails to close.
    pub fn close(&self, aborting: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        if *state == OpenState::Closed {
            return Ok(());
        }
        *state = OpenState::Closed;
        drop(state);

        match self.data.clone().close() {
            Ok(()) | Err(StorageError::Closed { .. }) => {}
            Err(err) if aborting => {
                tracing::warn!(ns = %self.ns, error = %err, "close during abort failed");
            }
            Err(err) => return Err(err.into()),
        }
        tracing::debug!(ns = %self.ns, aborting, "collection closed");
        Ok(())
    }

    /// Schedules removal of the data dictionary when `txn` commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be scheduled.
    pub fn drop_data(&self, env: &Environment, txn: &Transaction) -> CoreResult<()> {
        env.remove(txn, self.data.name())?;
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        match self.state() {
            OpenState::Open => Ok(()),
            state => Err(CoreError::invalid_operation(format!(
                "collection {} is {state:?}",
                self.ns
            ))),
        }
    }
}

fn decode_row_key(key: &[u8]) -> CoreResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| CoreError::fatal(format!("bad document key of length {}", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Snapshot cursor over a collection's documents.
#[derive(Debug)]
pub struct CollectionScan {
    collection: Arc<Collection>,
    rows: DictionaryCursor,
}

impl CollectionScan {
    /// Returns the collection being scanned.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }
}

impl Iterator for CollectionScan {
    type Item = CoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, bytes) = self.rows.next()?;
        Some(Document::decode(&bytes).map_err(CoreError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_storage::EnvConfig;

    fn setup() -> (Environment, Namespace, Vec<u8>) {
        let env = Environment::in_memory(EnvConfig::default());
        let ns = Namespace::parse("test.users").unwrap();
        let bytes = CollectionDescriptor::new(ns.as_str(), Document::new(), false)
            .encode()
            .unwrap();
        (env, ns, bytes)
    }

    fn open(env: &Environment, ns: &Namespace, bytes: &[u8]) -> Arc<Collection> {
        let txn = env.begin(false);
        Collection::create_data(env, &txn, ns).unwrap();
        let collection = Collection::make(env, &txn, ns, bytes, None).unwrap();
        txn.commit().unwrap();
        Arc::new(collection)
    }

    #[test]
    fn insert_assigns_id_first() {
        let (env, ns, bytes) = setup();
        let collection = open(&env, &ns, &bytes);
        assert_eq!(collection.state(), OpenState::Open);

        let txn = env.begin(false);
        let id = collection
            .insert(&txn, Document::new().with("name", "ada").with("_id", 7))
            .unwrap();
        assert_eq!(id, Value::Int(7));
        let generated = collection.insert(&txn, Document::new().with("name", "bob")).unwrap();
        assert!(matches!(generated, Value::String(_)));
        txn.commit().unwrap();

        let txn = env.begin(true);
        let docs: Vec<Document> = collection.scan(&txn).unwrap().map(Result::unwrap).collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].first(), Some(("_id", &Value::Int(7))));
        assert_eq!(docs[1].get("name"), Some(&Value::from("bob")));
        assert_eq!(collection.count(&txn).unwrap(), 2);
    }

    #[test]
    fn reopen_continues_key_sequence() {
        let (env, ns, bytes) = setup();
        let collection = open(&env, &ns, &bytes);
        let txn = env.begin(false);
        collection.insert(&txn, Document::new().with("n", 1)).unwrap();
        txn.commit().unwrap();
        collection.close(false).unwrap();

        let txn = env.begin(false);
        let reopened = Arc::new(Collection::make(&env, &txn, &ns, &bytes, None).unwrap());
        reopened.insert(&txn, Document::new().with("n", 2)).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(true);
        let values: Vec<Value> = reopened
            .scan(&txn)
            .unwrap()
            .map(|d| d.unwrap().get("n").cloned().unwrap())
            .collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn remove_matching_deletes_selected() {
        let (env, ns, bytes) = setup();
        let collection = open(&env, &ns, &bytes);
        let txn = env.begin(false);
        for n in 0..5 {
            collection.insert(&txn, Document::new().with("n", n)).unwrap();
        }
        let removed = collection
            .remove_matching(&txn, |d| matches!(d.get("n"), Some(Value::Int(n)) if n % 2 == 0))
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(collection.count(&txn).unwrap(), 2);
    }

    #[test]
    fn missing_data_dictionary_is_fatal() {
        let (env, ns, bytes) = setup();
        let txn = env.begin(false);
        let err = Collection::make(&env, &txn, &ns, &bytes, None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn closed_handle_rejects_use() {
        let (env, ns, bytes) = setup();
        let collection = open(&env, &ns, &bytes);
        collection.close(false).unwrap();
        collection.close(false).unwrap();
        assert_eq!(collection.state(), OpenState::Closed);
        let txn = env.begin(false);
        assert!(collection.insert(&txn, Document::new()).is_err());
    }

    #[test]
    fn bulk_loader_owns_handle() {
        let (env, ns, bytes) = setup();
        let txn = env.begin(false);
        Collection::create_data(&env, &txn, &ns).unwrap();
        let collection = Collection::make(&env, &txn, &ns, &bytes, Some(ConnectionId(4))).unwrap();
        assert!(collection.is_bulk_loading());
        assert!(collection.validate_connection(ConnectionId(4)).is_ok());
        let err = collection.validate_connection(ConnectionId(5)).unwrap_err();
        assert_eq!(err.code(), Some(16878));
    }

    #[test]
    fn drop_data_removes_dictionary_at_commit() {
        let (env, ns, bytes) = setup();
        let collection = open(&env, &ns, &bytes);
        let txn = env.begin(false);
        collection.drop_data(&env, &txn).unwrap();
        assert!(env.exists(&data_dictionary_name(ns.as_str())));
        txn.commit().unwrap();
        assert!(!env.exists(&data_dictionary_name(ns.as_str())));
    }
}
