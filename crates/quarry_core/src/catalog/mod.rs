//! The collection catalog of one database.
//!
//! Every database has one metadata dictionary, `<db>.ns`, holding a row per
//! namespace whose value is the serialized [`CollectionDescriptor`]. The
//! catalog opens that dictionary lazily and keeps the open collection
//! handles in a cache shared by every connection.
//!
//! ## Opening a namespace
//!
//! A namespace is opened at most once per metadata generation. The open
//! reads the metadata row with [`LockMode::ReadModifyWrite`], which takes
//! the storage row lock, then re-checks the cache under that lock before
//! constructing the handle. Two threads racing to open the same namespace
//! serialize on the row; the loser finds the winner's handle in the cache.
//!
//! ## Rollback
//!
//! Mutations note the namespaces they touch in the transaction's
//! [`RollbackLedger`](crate::rollback::RollbackLedger). On abort the
//! ledger closes those cached handles, then forgets the metadata
//! dictionary if this transaction created it.

use crate::collection::{Collection, CollectionDescriptor};
use crate::context::OperationContext;
use crate::error::{CoreError, CoreResult};
use crate::stats::CatalogStats;
use crate::types::{ConnectionId, Namespace, SYSTEM_INDEXES, SYSTEM_NAMESPACES};
use parking_lot::{Mutex, RwLock};
use quarry_codec::{Document, Value};
use quarry_storage::{Dictionary, Environment, LockMode, PutMode, StorageError, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Returns the name of the metadata dictionary of database `db`.
#[must_use]
pub fn metadata_dictionary_name(db: &str) -> String {
    format!("{db}.ns")
}

/// Namespace directory of one database.
pub struct CollectionCatalog {
    database: String,
    env: Environment,
    metadata: RwLock<Option<Dictionary>>,
    allocated: AtomicBool,
    open_lock: Mutex<()>,
    cache: RwLock<HashMap<String, Arc<Collection>>>,
    stats: CatalogStats,
}

impl CollectionCatalog {
    /// Creates an unallocated catalog for `database`.
    #[must_use]
    pub fn new(database: &str, env: Environment) -> Self {
        Self {
            database: database.to_string(),
            env,
            metadata: RwLock::new(None),
            allocated: AtomicBool::new(false),
            open_lock: Mutex::new(()),
            cache: RwLock::new(HashMap::new()),
            stats: CatalogStats::new(),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns true once the metadata dictionary is open.
    #[must_use]
    pub fn allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    /// Returns the catalog counters.
    #[must_use]
    pub fn stats(&self) -> &CatalogStats {
        &self.stats
    }

    /// Returns the number of cached open handles.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Returns true if `ns` has a cached open handle.
    #[must_use]
    pub fn is_open(&self, ns: &str) -> bool {
        self.cache.read().contains_key(ns)
    }

    /// Opens the metadata dictionary if it is not open yet.
    ///
    /// Returns false if the dictionary does not exist and `may_create` is
    /// false. Creating it requires the database write lock; under a read
    /// lock this returns [`CoreError::RetryWithWriteLock`]. A created
    /// dictionary is noted in the transaction's rollback ledger.
    ///
    /// # Errors
    ///
    /// Fails if the database is not locked, no transaction is open, or the
    /// storage engine reports an unexpected error.
    pub fn init(self: &Arc<Self>, ctx: &mut OperationContext, may_create: bool) -> CoreResult<bool> {
        ctx.assert_at_least_read_locked(&self.database)?;
        if self.allocated() {
            return Ok(true);
        }
        let _open = self.open_lock.lock();
        if self.allocated() {
            return Ok(true);
        }

        let name = metadata_dictionary_name(&self.database);
        let existing = self.env.open(ctx.txn()?, &name, false);
        let dictionary = match existing {
            Ok(dictionary) => dictionary,
            Err(StorageError::NeedsCreate { .. }) => {
                if !may_create {
                    return Ok(false);
                }
                if !ctx.is_write_locked(&self.database) {
                    return Err(CoreError::retry_with_write_lock(format!(
                        "creating new database {}",
                        self.database
                    )));
                }
                let created = self
                    .env
                    .open(ctx.txn()?, &name, true)
                    .map_err(|e| self.translate(e))?;
                ctx.ledger_mut()?.note_create(self);
                tracing::info!(db = %self.database, "created database catalog");
                created
            }
            Err(err) => return Err(self.translate(err)),
        };

        *self.metadata.write() = Some(dictionary);
        self.allocated.store(true, Ordering::Release);
        Ok(true)
    }

    /// Returns the open handle for `ns`, opening it on demand.
    ///
    /// Returns `None` if the namespace does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BulkLoadConflict`] if another connection is
    /// bulk loading the collection, or any error of [`Self::open_ns`].
    pub fn get_collection(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        ns: &str,
    ) -> CoreResult<Option<Arc<Collection>>> {
        ctx.assert_at_least_read_locked(ns)?;
        let cached = self.cache.read().get(ns).cloned();
        self.stats.record_lookup(cached.is_some());

        let collection = match cached {
            Some(collection) => collection,
            None => {
                if !self.init(ctx, false)? {
                    return Ok(None);
                }
                match self.open_ns(ctx, ns, None)? {
                    Some(collection) => collection,
                    None => return Ok(None),
                }
            }
        };
        collection.validate_connection(ctx.connection_id())?;
        Ok(Some(collection))
    }

    /// Opens `ns` from its metadata row and caches the handle.
    ///
    /// Without a writable transaction the open runs in an alternate
    /// transaction so the row lock is not left on the caller's.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SnapshotTooNew`] if the collection was created
    /// after the transaction's snapshot, or a fatal error for corrupt
    /// metadata.
    pub fn open_ns(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        ns: &str,
        bulk_loader: Option<ConnectionId>,
    ) -> CoreResult<Option<Arc<Collection>>> {
        let writable = ctx.current_txn().is_some_and(|txn| !txn.is_read_only());
        if writable {
            self.open_in(ctx.txn()?, ns, bulk_loader)
        } else {
            let env = self.env.clone();
            ctx.with_alternate_txn(&env, |ctx| self.open_in(ctx.txn()?, ns, bulk_loader))
        }
    }

    fn open_in(
        &self,
        txn: &Transaction,
        ns: &str,
        bulk_loader: Option<ConnectionId>,
    ) -> CoreResult<Option<Arc<Collection>>> {
        let Some(metadata) = self.metadata.read().clone() else {
            return Ok(None);
        };
        let namespace = Namespace::parse(ns)?;
        let row = metadata
            .get(txn, ns.as_bytes(), LockMode::ReadModifyWrite)
            .map_err(|e| self.translate(e))?;
        let Some(bytes) = row else {
            return Ok(None);
        };

        // The row lock is held; a handle cached now was opened by a racer.
        if let Some(existing) = self.cache.read().get(ns) {
            return Ok(Some(Arc::clone(existing)));
        }

        let collection = Arc::new(Collection::make(&self.env, txn, &namespace, &bytes, bulk_loader)?);
        self.stats.record_constructed();
        let mut cache = self.cache.write();
        if cache.contains_key(ns) {
            return Err(CoreError::fatal(format!("{ns} was opened twice")));
        }
        cache.insert(ns.to_string(), Arc::clone(&collection));
        self.stats.record_open();
        Ok(Some(collection))
    }

    /// Closes and uncaches the handle of `ns`, returning whether one was open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotHeld`] without the write lock, or the
    /// close error when not `aborting`.
    pub fn close_ns(&self, ctx: &OperationContext, ns: &str, aborting: bool) -> CoreResult<bool> {
        ctx.assert_write_locked(ns)?;
        if !self.allocated() {
            return Ok(false);
        }
        self.close_cached(ns, aborting)
    }

    fn close_cached(&self, ns: &str, aborting: bool) -> CoreResult<bool> {
        let removed = self.cache.write().remove(ns);
        match removed {
            Some(collection) => {
                self.stats.record_close();
                collection.close(aborting)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Caches a freshly constructed handle.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if `ns` is already cached.
    pub fn add_ns(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        ns: &str,
        collection: Arc<Collection>,
    ) -> CoreResult<()> {
        self.require_write_lock(ctx, ns, "adding")?;
        ctx.ledger_mut()?.note_namespace(self, ns);
        let mut cache = self.cache.write();
        if cache.contains_key(ns) {
            return Err(CoreError::fatal(format!("{ns} is already in the catalog cache")));
        }
        cache.insert(ns.to_string(), collection);
        Ok(())
    }

    /// Writes the metadata row of `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NamespaceExists`] when not `overwrite` and the
    /// row exists.
    pub fn update_ns(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        ns: &str,
        serialized: &[u8],
        overwrite: bool,
    ) -> CoreResult<()> {
        self.require_write_lock(ctx, ns, "updating")?;
        let metadata = self.metadata_dictionary()?;
        ctx.ledger_mut()?.note_namespace(self, ns);
        let mode = if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::NoOverwrite
        };
        metadata
            .put(ctx.txn()?, ns.as_bytes(), serialized, mode)
            .map_err(|err| match err {
                StorageError::KeyExists { .. } => CoreError::NamespaceExists { ns: ns.to_string() },
                other => self.translate(other),
            })
    }

    /// Closes `ns` and deletes its metadata row. A missing row is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the handle cannot be closed or the row cannot be deleted.
    pub fn kill_ns(self: &Arc<Self>, ctx: &mut OperationContext, ns: &str) -> CoreResult<()> {
        self.require_write_lock(ctx, ns, "removing")?;
        if !self.allocated() {
            return Ok(());
        }
        let metadata = self.metadata_dictionary()?;
        ctx.ledger_mut()?.note_namespace(self, ns);
        self.close_cached(ns, false)?;

        let txn = ctx.txn()?;
        let exists = metadata
            .get(txn, ns.as_bytes(), LockMode::ReadModifyWrite)
            .map_err(|e| self.translate(e))?
            .is_some();
        if exists {
            metadata.delete(txn, ns.as_bytes()).map_err(|e| self.translate(e))?;
        }
        Ok(())
    }

    /// Lists every namespace with a metadata row.
    ///
    /// This is a best-effort enumeration: rows committed by other
    /// transactions after the scan starts are not seen.
    ///
    /// # Errors
    ///
    /// Fails if the metadata dictionary cannot be read.
    pub fn get_namespaces(self: &Arc<Self>, ctx: &mut OperationContext) -> CoreResult<Vec<String>> {
        if !self.init(ctx, false)? {
            return Ok(Vec::new());
        }
        let metadata = self.metadata_dictionary()?;
        let rows = metadata.cursor(ctx.txn()?).map_err(|e| self.translate(e))?;
        rows.map(|(key, _)| {
            String::from_utf8(key)
                .map_err(|_| CoreError::fatal(format!("non UTF-8 namespace in {}", metadata.name())))
        })
        .collect()
    }

    /// Creates collection `ns` with `options`.
    ///
    /// The namespace is registered in `system.namespaces` and its `_id_`
    /// index in `system.indexes`; both are created on demand.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RetryWithWriteLock`] without the database write
    /// lock and [`CoreError::NamespaceExists`] if the collection exists.
    pub fn create_collection(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        ns: &str,
        options: Document,
    ) -> CoreResult<Arc<Collection>> {
        let namespace = Namespace::parse(ns)?;
        if namespace.db() != self.database {
            return Err(CoreError::invalid_operation(format!(
                "{ns} does not belong to database {}",
                self.database
            )));
        }
        self.require_write_lock(ctx, ns, "creating")?;
        self.init(ctx, true)?;

        let descriptor = CollectionDescriptor::new(ns, options, namespace.is_system());
        let bytes = descriptor.encode()?;
        self.update_ns(ctx, ns, &bytes, false)?;
        Collection::create_data(&self.env, ctx.txn()?, &namespace)?;
        let collection = Arc::new(Collection::make(&self.env, ctx.txn()?, &namespace, &bytes, None)?);
        self.stats.record_constructed();
        self.add_ns(ctx, ns, Arc::clone(&collection))?;

        if !namespace.is_system_namespaces() {
            let namespaces = self.system_collection(ctx, SYSTEM_NAMESPACES)?;
            namespaces.insert(ctx.txn()?, descriptor.namespace_entry())?;
        }
        if !namespace.is_system() {
            let indexes = self.system_collection(ctx, SYSTEM_INDEXES)?;
            for index in &descriptor.indexes {
                indexes.insert(ctx.txn()?, index.to_entry(ns))?;
            }
        }
        tracing::info!(ns, "created collection");
        Ok(collection)
    }

    fn system_collection(
        self: &Arc<Self>,
        ctx: &mut OperationContext,
        collection: &str,
    ) -> CoreResult<Arc<Collection>> {
        let ns = Namespace::new(&self.database, collection)?;
        match self.get_collection(ctx, ns.as_str())? {
            Some(existing) => Ok(existing),
            None => self.create_collection(ctx, ns.as_str(), Document::new()),
        }
    }

    /// Drops collection `ns`, returning false if it does not exist.
    ///
    /// Its index entries and `system.namespaces` entry are removed, the
    /// metadata row is deleted and the data dictionary is removed at commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RetryWithWriteLock`] without the database write
    /// lock, or any storage failure.
    pub fn drop_collection(self: &Arc<Self>, ctx: &mut OperationContext, ns: &str) -> CoreResult<bool> {
        self.require_write_lock(ctx, ns, "dropping")?;
        let Some(collection) = self.get_collection(ctx, ns)? else {
            return Ok(false);
        };
        let namespace = collection.ns().clone();

        if !namespace.is_system_indexes() {
            let indexes = namespace.sister(SYSTEM_INDEXES);
            if let Some(indexes) = self.get_collection(ctx, &indexes)? {
                indexes.remove_matching(ctx.txn()?, |entry| field_is(entry, "ns", ns))?;
            }
        }
        if !namespace.is_system_namespaces() {
            let namespaces = namespace.sister(SYSTEM_NAMESPACES);
            if let Some(namespaces) = self.get_collection(ctx, &namespaces)? {
                namespaces.remove_matching(ctx.txn()?, |entry| field_is(entry, "name", ns))?;
            }
        }

        collection.drop_data(&self.env, ctx.txn()?)?;
        self.kill_ns(ctx, ns)?;
        tracing::info!(ns, "dropped collection");
        Ok(true)
    }

    /// Drops every collection of the database and removes the metadata
    /// dictionary at commit.
    ///
    /// `system.namespaces` and then `system.indexes` are dropped last.
    /// The cache is empty afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockNotHeld`] without the database write lock,
    /// or a fatal error if a handle survives the drop.
    pub fn drop(self: &Arc<Self>, ctx: &mut OperationContext) -> CoreResult<()> {
        ctx.assert_write_locked(&self.database)?;
        if !self.init(ctx, false)? {
            return Ok(());
        }

        let system_namespaces = Namespace::new(&self.database, SYSTEM_NAMESPACES)?;
        let system_indexes = Namespace::new(&self.database, SYSTEM_INDEXES)?;
        let mut names: BTreeSet<String> = self.get_namespaces(ctx)?.into_iter().collect();
        if let Some(listed) = self.get_collection(ctx, system_namespaces.as_str())? {
            for entry in listed.scan(ctx.txn()?)? {
                if let Some(name) = entry?.get("name").and_then(Value::as_str) {
                    names.insert(name.to_string());
                }
            }
        }

        for name in &names {
            if name != system_namespaces.as_str() && name != system_indexes.as_str() {
                self.drop_collection(ctx, name)?;
            }
        }
        self.drop_collection(ctx, system_namespaces.as_str())?;
        self.drop_collection(ctx, system_indexes.as_str())?;

        let remaining = self.cached_count();
        if remaining != 0 {
            return Err(CoreError::fatal(format!(
                "{remaining} collections of {} still open after drop",
                self.database
            )));
        }

        let _open = self.open_lock.lock();
        if let Some(metadata) = self.metadata.write().take() {
            self.env
                .remove(ctx.txn()?, metadata.name())
                .map_err(|e| self.translate(e))?;
            match metadata.close() {
                Ok(()) | Err(StorageError::Closed { .. }) => {}
                Err(err) => return Err(self.translate(err)),
            }
        }
        self.allocated.store(false, Ordering::Release);
        tracing::info!(db = %self.database, dropped = names.len(), "dropped database");
        Ok(())
    }

    /// Reopens `ns` in bulk-load mode, owned by the calling connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if `ns` does not exist.
    pub fn begin_bulk_load(self: &Arc<Self>, ctx: &mut OperationContext, ns: &str) -> CoreResult<Arc<Collection>> {
        self.require_write_lock(ctx, ns, "bulk loading")?;
        if !self.init(ctx, false)? {
            return Err(CoreError::CollectionNotFound { ns: ns.to_string() });
        }
        if let Some(cached) = self.cache.read().get(ns) {
            cached.validate_connection(ctx.connection_id())?;
        }
        self.close_ns(ctx, ns, false)?;
        ctx.ledger_mut()?.note_namespace(self, ns);
        let owner = ctx.connection_id();
        let collection = self
            .open_ns(ctx, ns, Some(owner))?
            .ok_or_else(|| CoreError::CollectionNotFound { ns: ns.to_string() })?;
        tracing::debug!(ns, conn = %owner, "bulk load started");
        Ok(collection)
    }

    /// Ends the calling connection's bulk load of `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BulkLoadConflict`] if another connection owns
    /// the load.
    pub fn end_bulk_load(&self, ctx: &OperationContext, ns: &str) -> CoreResult<()> {
        ctx.assert_write_locked(ns)?;
        let cached = self.cache.read().get(ns).cloned();
        match cached {
            Some(collection) if collection.is_bulk_loading() => {
                collection.validate_connection(ctx.connection_id())?;
                self.close_ns(ctx, ns, false)?;
                tracing::debug!(ns, conn = %ctx.connection_id(), "bulk load finished");
                Ok(())
            }
            _ => Err(CoreError::invalid_operation(format!("{ns} is not being bulk loaded"))),
        }
    }

    /// Forgets the metadata dictionary created by an aborted transaction.
    ///
    /// The storage abort removes the dictionary itself.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if any handle is still cached.
    pub fn rollback_create(&self) -> CoreResult<()> {
        let _open = self.open_lock.lock();
        let remaining = self.cached_count();
        if remaining != 0 {
            return Err(CoreError::fatal(format!(
                "rolling back catalog {} with {remaining} open collections",
                self.database
            )));
        }
        self.metadata.write().take();
        self.allocated.store(false, Ordering::Release);
        tracing::debug!(db = %self.database, "rolled back catalog creation");
        Ok(())
    }

    /// Closes the cached handle of `ns` after an abort, so the next open
    /// reads the committed metadata.
    ///
    /// # Errors
    ///
    /// Never fails in practice; close errors are logged while aborting.
    pub fn rollback_ns(&self, ns: &str) -> CoreResult<()> {
        if self.close_cached(ns, true)? {
            tracing::debug!(ns, "rolled back namespace");
        }
        Ok(())
    }

    fn require_write_lock(&self, ctx: &OperationContext, ns: &str, action: &str) -> CoreResult<()> {
        if ctx.is_write_locked(ns) {
            Ok(())
        } else {
            Err(CoreError::retry_with_write_lock(format!("{action} {ns}")))
        }
    }

    fn metadata_dictionary(&self) -> CoreResult<Dictionary> {
        self.metadata.read().clone().ok_or_else(|| {
            CoreError::fatal(format!("catalog of {} is not allocated", self.database))
        })
    }

    fn translate(&self, err: StorageError) -> CoreError {
        match err {
            StorageError::DictionaryTooNew { name } => CoreError::SnapshotTooNew { ns: name },
            StorageError::LockTimeout { name, waited } => CoreError::LockTimeout {
                resource: name,
                waited,
            },
            other => CoreError::fatal(format!("catalog {}: {other}", self.database)),
        }
    }
}

fn field_is(doc: &Document, field: &str, expected: &str) -> bool {
    doc.get(field).and_then(Value::as_str) == Some(expected)
}

impl std::fmt::Debug for CollectionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCatalog")
            .field("database", &self.database)
            .field("allocated", &self.allocated())
            .field("cached", &self.cached_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::data_dictionary_name;
    use crate::lock::LockManager;
    use quarry_storage::EnvConfig;
    use std::thread;
    use std::time::Duration;

    struct Fixture {
        env: Environment,
        locks: Arc<LockManager>,
        catalog: Arc<CollectionCatalog>,
    }

    impl Fixture {
        fn new() -> Self {
            let env = Environment::in_memory(EnvConfig::default());
            let catalog = Arc::new(CollectionCatalog::new("test", env.clone()));
            Self {
                env,
                locks: Arc::new(LockManager::new(Duration::from_secs(5))),
                catalog,
            }
        }

        fn ctx(&self, id: u64) -> OperationContext {
            OperationContext::new(ConnectionId(id), Arc::clone(&self.locks))
        }

        fn writer(&self, id: u64) -> OperationContext {
            let mut ctx = self.ctx(id);
            ctx.lock_exclusive("test").unwrap();
            ctx.begin(&self.env, false);
            ctx
        }

        fn create(&self, ns: &str) {
            let mut ctx = self.writer(1);
            self.catalog.create_collection(&mut ctx, ns, Document::new()).unwrap();
            ctx.commit().unwrap();
        }
    }

    #[test]
    fn init_without_create_leaves_catalog_unallocated() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx(1);
        ctx.lock_shared("test").unwrap();
        ctx.begin(&fx.env, true);
        assert!(!fx.catalog.init(&mut ctx, false).unwrap());
        assert!(!fx.catalog.allocated());
    }

    #[test]
    fn creating_under_read_lock_asks_for_write_lock() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx(1);
        ctx.lock_shared("test").unwrap();
        ctx.begin(&fx.env, false);
        let err = fx.catalog.init(&mut ctx, true).unwrap_err();
        assert!(matches!(err, CoreError::RetryWithWriteLock { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn init_requires_a_lock() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx(1);
        ctx.begin(&fx.env, false);
        assert!(matches!(
            fx.catalog.init(&mut ctx, true),
            Err(CoreError::LockNotHeld { .. })
        ));
    }

    #[test]
    fn create_registers_system_entries() {
        let fx = Fixture::new();
        fx.create("test.users");

        let mut ctx = fx.writer(1);
        let names = fx.catalog.get_namespaces(&mut ctx).unwrap();
        assert_eq!(
            names,
            vec!["test.system.indexes", "test.system.namespaces", "test.users"]
        );

        let listed = fx
            .catalog
            .get_collection(&mut ctx, "test.system.namespaces")
            .unwrap()
            .unwrap();
        let entries: Vec<Document> = listed.scan(ctx.txn().unwrap()).unwrap().map(Result::unwrap).collect();
        let listed_names: Vec<&str> = entries
            .iter()
            .filter_map(|d| d.get("name").and_then(Value::as_str))
            .collect();
        assert!(listed_names.contains(&"test.users"));
        assert!(listed_names.contains(&"test.system.indexes"));
        assert!(!listed_names.contains(&"test.system.namespaces"));

        let indexes = fx
            .catalog
            .get_collection(&mut ctx, "test.system.indexes")
            .unwrap()
            .unwrap();
        assert_eq!(indexes.count(ctx.txn().unwrap()).unwrap(), 1);
        assert_eq!(fx.catalog.stats().constructed(), 3);
    }

    #[test]
    fn duplicate_create_fails() {
        let fx = Fixture::new();
        fx.create("test.users");
        let mut ctx = fx.writer(1);
        let err = fx
            .catalog
            .create_collection(&mut ctx, "test.users", Document::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::NamespaceExists { .. }));
    }

    #[test]
    fn missing_namespace_is_not_an_error() {
        let fx = Fixture::new();
        fx.create("test.users");
        let mut ctx = fx.ctx(1);
        ctx.lock_shared("test").unwrap();
        ctx.begin(&fx.env, true);
        assert!(fx.catalog.get_collection(&mut ctx, "test.nothing").unwrap().is_none());
    }

    #[test]
    fn aborted_create_is_rolled_back() {
        let fx = Fixture::new();
        let mut ctx = fx.writer(1);
        fx.catalog
            .create_collection(&mut ctx, "test.users", Document::new())
            .unwrap();
        assert!(fx.catalog.allocated());
        assert_eq!(fx.catalog.cached_count(), 3);
        ctx.abort().unwrap();

        assert_eq!(fx.catalog.cached_count(), 0);
        assert!(!fx.catalog.allocated());
        assert!(!fx.env.exists(&metadata_dictionary_name("test")));
        assert!(!fx.env.exists(&data_dictionary_name("test.users")));
    }

    #[test]
    fn aborted_create_in_existing_catalog_keeps_catalog() {
        let fx = Fixture::new();
        fx.create("test.users");
        let mut ctx = fx.writer(1);
        fx.catalog
            .create_collection(&mut ctx, "test.orders", Document::new())
            .unwrap();
        ctx.abort().unwrap();

        assert!(fx.catalog.allocated());
        assert!(!fx.catalog.is_open("test.orders"));
        drop(ctx);
        let mut ctx = fx.writer(1);
        assert!(fx.catalog.get_collection(&mut ctx, "test.orders").unwrap().is_none());
        assert!(fx.catalog.get_collection(&mut ctx, "test.users").unwrap().is_some());
    }

    #[test]
    fn concurrent_opens_construct_once() {
        let fx = Fixture::new();
        fx.create("test.users");
        let fresh = Arc::new(CollectionCatalog::new("test", fx.env.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = Arc::clone(&fresh);
                let env = fx.env.clone();
                let mut ctx = fx.ctx(10 + i);
                thread::spawn(move || {
                    ctx.lock_shared("test").unwrap();
                    ctx.begin(&env, true);
                    let collection = catalog.get_collection(&mut ctx, "test.users").unwrap().unwrap();
                    ctx.commit().unwrap();
                    collection
                })
            })
            .collect();
        let opened: Vec<Arc<Collection>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(opened.iter().all(|c| Arc::ptr_eq(c, &opened[0])));
        assert_eq!(fresh.stats().constructed(), 1);
        assert_eq!(fresh.stats().opens(), 1);
        assert_eq!(fresh.stats().lookups(), 8);
    }

    #[test]
    fn drop_collection_removes_entries() {
        let fx = Fixture::new();
        fx.create("test.users");
        fx.create("test.orders");

        let mut ctx = fx.writer(1);
        assert!(fx.catalog.drop_collection(&mut ctx, "test.users").unwrap());
        assert!(!fx.catalog.drop_collection(&mut ctx, "test.users").unwrap());
        ctx.commit().unwrap();
        assert!(!fx.env.exists(&data_dictionary_name("test.users")));
        drop(ctx);

        let mut ctx = fx.writer(1);
        let names = fx.catalog.get_namespaces(&mut ctx).unwrap();
        assert!(!names.contains(&"test.users".to_string()));
        let indexes = fx
            .catalog
            .get_collection(&mut ctx, "test.system.indexes")
            .unwrap()
            .unwrap();
        let entries: Vec<Document> = indexes.scan(ctx.txn().unwrap()).unwrap().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get("ns"), Some(&Value::from("test.orders")));
    }

    #[test]
    fn drop_empties_cache_and_removes_dictionary() {
        let fx = Fixture::new();
        fx.create("test.users");
        fx.create("test.orders");

        let mut ctx = fx.writer(1);
        fx.catalog.drop(&mut ctx).unwrap();
        assert_eq!(fx.catalog.cached_count(), 0);
        assert!(!fx.catalog.allocated());
        ctx.commit().unwrap();

        assert!(!fx.env.exists(&metadata_dictionary_name("test")));
        assert!(!fx.env.exists(&data_dictionary_name("test.users")));
        assert!(!fx.env.exists(&data_dictionary_name("test.system.indexes")));
    }

    #[test]
    fn drop_requires_write_lock() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx(1);
        ctx.lock_shared("test").unwrap();
        ctx.begin(&fx.env, false);
        assert!(matches!(
            fx.catalog.drop(&mut ctx),
            Err(CoreError::LockNotHeld { required: "write", .. })
        ));
    }

    #[test]
    fn bulk_load_excludes_other_connections() {
        let fx = Fixture::new();
        fx.create("test.users");

        let mut owner = fx.writer(1);
        let loading = fx.catalog.begin_bulk_load(&mut owner, "test.users").unwrap();
        assert!(loading.is_bulk_loading());
        let same = fx.catalog.get_collection(&mut owner, "test.users").unwrap().unwrap();
        assert!(Arc::ptr_eq(&loading, &same));
        owner.commit().unwrap();
        owner.unlock_all();

        let mut other = fx.ctx(2);
        other.lock_shared("test").unwrap();
        other.begin(&fx.env, true);
        let err = fx.catalog.get_collection(&mut other, "test.users").unwrap_err();
        assert!(matches!(err, CoreError::BulkLoadConflict { owner: 1, .. }));
        drop(other);

        let mut owner = fx.writer(1);
        fx.catalog.end_bulk_load(&owner, "test.users").unwrap();
        let reopened = fx.catalog.get_collection(&mut owner, "test.users").unwrap().unwrap();
        assert!(!reopened.is_bulk_loading());
    }

    #[test]
    fn close_ns_requires_write_lock() {
        let fx = Fixture::new();
        fx.create("test.users");
        let mut ctx = fx.ctx(1);
        ctx.lock_shared("test").unwrap();
        assert!(fx.catalog.close_ns(&ctx, "test.users", false).is_err());
        ctx.lock_exclusive("test").unwrap();
        assert!(fx.catalog.close_ns(&ctx, "test.users", false).unwrap());
        assert!(!fx.catalog.close_ns(&ctx, "test.users", false).unwrap());
        assert_eq!(fx.catalog.stats().closes(), 1);
    }
}
