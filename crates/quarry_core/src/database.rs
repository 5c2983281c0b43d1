//! Database facade.

use crate::catalog::CollectionCatalog;
use crate::config::Config;
use crate::context::OperationContext;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockLevel, LockManager};
use crate::pipeline::{
    AggregateCommand, AggregateReply, ArraySource, CursorSource, DocumentSource, ExpressionContext,
};
use crate::types::{validate_database_name, ConnectionId, Namespace};
use parking_lot::RwLock;
use quarry_codec::{Document, Value};
use quarry_storage::Environment;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How many times an operation is rerun after its snapshot went stale.
const MAX_SNAPSHOT_RETRIES: usize = 3;

/// Lock and transaction an auto-commit operation starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Shared lock, read-only transaction.
    Read,
    /// Shared lock, writable transaction; upgraded to the exclusive lock
    /// when the operation asks for it.
    Write,
    /// Exclusive lock, writable transaction.
    Exclusive,
}

/// The main database handle.
///
/// A `Database` owns one storage environment, which may hold any number of
/// logical databases. Each logical database has its own
/// [`CollectionCatalog`], created on first use and shared by every
/// connection.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use quarry_core::{Database, Document};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_data"))?;
/// db.insert("shop.orders", vec![Document::new().with("item", "pen").with("qty", 2)])?;
///
/// let reply = db.aggregate(
///     "shop",
///     &Document::from_json_str(r#"{"aggregate": "orders", "pipeline": [{"$match": {"qty": {"$gt": 1}}}]}"#)?,
/// )?;
/// println!("{reply}");
/// # Ok::<(), quarry_core::CoreError>(())
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`:
///
/// ```rust
/// let db = quarry_core::Database::open_in_memory();
/// assert!(db.collection_names("test")?.is_empty());
/// # Ok::<(), quarry_core::CoreError>(())
/// ```
pub struct Database {
    config: Config,
    /// Holds the directory lock. None for in-memory databases.
    dir: Option<DatabaseDir>,
    env: Environment,
    locks: Arc<LockManager>,
    catalogs: RwLock<HashMap<String, Arc<CollectionCatalog>>>,
    next_connection: AtomicU64,
}

impl Database {
    /// Opens a database from a directory path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the directory locked (`DatabaseLocked`)
    /// - The directory is missing and may not be created
    /// - A dictionary log cannot be replayed
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// ```rust,no_run
    /// use quarry_core::{Config, Database};
    /// use std::path::Path;
    ///
    /// let config = Config::default()
    ///     .create_if_missing(false)
    ///     .sync_on_commit(false);
    ///
    /// let db = Database::open_with_config(Path::new("my_data"), config)?;
    /// # Ok::<(), quarry_core::CoreError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let env = Environment::open_dir(&dir.data_path(), config.env_config())?;
        tracing::info!(path = %path.display(), "opened database");
        Ok(Self::assemble(config, Some(dir), env))
    }

    /// Creates an in-memory database with the default configuration.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Creates an in-memory database.
    #[must_use]
    pub fn open_in_memory_with_config(config: Config) -> Self {
        let env = Environment::in_memory(config.env_config());
        Self::assemble(config, None, env)
    }

    fn assemble(config: Config, dir: Option<DatabaseDir>, env: Environment) -> Self {
        Self {
            locks: Arc::new(LockManager::new(config.lock_timeout)),
            config,
            dir,
            env,
            catalogs: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the data directory, or `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// Returns the storage environment.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Allocates a new connection id.
    pub fn connect(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an operation context for `conn`, holding no locks.
    #[must_use]
    pub fn context(&self, conn: ConnectionId) -> OperationContext {
        OperationContext::new(conn, Arc::clone(&self.locks))
    }

    /// Returns the catalog of database `db`, creating the (unallocated)
    /// catalog object on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidNamespace`] for a bad database name.
    pub fn catalog(&self, db: &str) -> CoreResult<Arc<CollectionCatalog>> {
        validate_database_name(db).map_err(|reason| CoreError::InvalidNamespace {
            ns: db.to_string(),
            reason,
        })?;
        if let Some(catalog) = self.catalogs.read().get(db) {
            return Ok(Arc::clone(catalog));
        }
        let mut catalogs = self.catalogs.write();
        let catalog = catalogs
            .entry(db.to_string())
            .or_insert_with(|| Arc::new(CollectionCatalog::new(db, self.env.clone())));
        Ok(Arc::clone(catalog))
    }

    /// Runs `op` as one auto-commit operation on database `db`.
    ///
    /// The operation runs in a fresh transaction under the lock `access`
    /// asks for, and commits if it succeeds. If it fails with
    /// [`CoreError::RetryWithWriteLock`] under the shared lock, the
    /// transaction is aborted, the exclusive lock taken and `op` run again
    /// from the start. [`CoreError::SnapshotTooNew`] reruns it with a newer
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns the error of `op`, a lock timeout, or a commit failure.
    pub fn run<T>(
        &self,
        conn: ConnectionId,
        db: &str,
        access: Access,
        mut op: impl FnMut(&mut OperationContext, &Arc<CollectionCatalog>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let catalog = self.catalog(db)?;
        let mut ctx = self.context(conn);
        let mut level = match access {
            Access::Exclusive => LockLevel::Exclusive,
            Access::Read | Access::Write => LockLevel::Shared,
        };
        let mut stale_snapshots = 0;

        loop {
            match level {
                LockLevel::Shared => ctx.lock_shared(db)?,
                LockLevel::Exclusive => ctx.lock_exclusive(db)?,
            }
            let read_only = access == Access::Read && level == LockLevel::Shared;
            ctx.begin(&self.env, read_only);

            let err = match op(&mut ctx, &catalog) {
                Ok(value) => {
                    ctx.commit()?;
                    ctx.unlock(db);
                    return Ok(value);
                }
                Err(err) => err,
            };
            if let Err(abort_err) = ctx.abort() {
                tracing::warn!(db, error = %abort_err, "abort after failed operation failed");
            }

            match err {
                CoreError::RetryWithWriteLock { ref reason } if level == LockLevel::Shared => {
                    tracing::debug!(db, reason = %reason, "retrying with write lock");
                    ctx.unlock(db);
                    level = LockLevel::Exclusive;
                }
                CoreError::SnapshotTooNew { ref ns } if stale_snapshots < MAX_SNAPSHOT_RETRIES => {
                    stale_snapshots += 1;
                    tracing::debug!(db, ns = %ns, attempt = stale_snapshots, "snapshot too old, retrying");
                }
                err => {
                    ctx.unlock(db);
                    return Err(err);
                }
            }
        }
    }

    // === Collections ===

    /// Creates collection `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NamespaceExists`] if it already exists.
    pub fn create_collection(&self, ns: &str, options: Document) -> CoreResult<()> {
        let namespace = Namespace::parse(ns)?;
        self.run(self.connect(), namespace.db(), Access::Write, |ctx, catalog| {
            catalog.create_collection(ctx, ns, options.clone()).map(|_| ())
        })
    }

    /// Inserts documents into `ns`, creating the collection if needed, and
    /// returns their `_id`s.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad namespace or a failed write.
    pub fn insert(&self, ns: &str, docs: impl IntoIterator<Item = Document>) -> CoreResult<Vec<Value>> {
        let namespace = Namespace::parse(ns)?;
        let docs: Vec<Document> = docs.into_iter().collect();
        self.run(self.connect(), namespace.db(), Access::Write, |ctx, catalog| {
            let collection = match catalog.get_collection(ctx, ns)? {
                Some(collection) => collection,
                None => catalog.create_collection(ctx, ns, Document::new())?,
            };
            docs.iter()
                .map(|doc| collection.insert(ctx.txn()?, doc.clone()))
                .collect()
        })
    }

    /// Bulk loads documents into the existing collection `ns` on one
    /// connection, returning how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if `ns` does not exist.
    pub fn bulk_load(&self, ns: &str, docs: impl IntoIterator<Item = Document>) -> CoreResult<usize> {
        let namespace = Namespace::parse(ns)?;
        let docs: Vec<Document> = docs.into_iter().collect();
        self.run(self.connect(), namespace.db(), Access::Exclusive, |ctx, catalog| {
            let collection = catalog.begin_bulk_load(ctx, ns)?;
            for doc in &docs {
                collection.insert(ctx.txn()?, doc.clone())?;
            }
            catalog.end_bulk_load(ctx, ns)?;
            Ok(docs.len())
        })
    }

    /// Returns every document of `ns`, or nothing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    pub fn find(&self, ns: &str) -> CoreResult<Vec<Document>> {
        let namespace = Namespace::parse(ns)?;
        self.run(self.connect(), namespace.db(), Access::Read, |ctx, catalog| {
            match catalog.get_collection(ctx, ns)? {
                Some(collection) => collection.scan(ctx.txn()?)?.collect(),
                None => Ok(Vec::new()),
            }
        })
    }

    /// Counts the documents of `ns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    pub fn count(&self, ns: &str) -> CoreResult<usize> {
        let namespace = Namespace::parse(ns)?;
        self.run(self.connect(), namespace.db(), Access::Read, |ctx, catalog| {
            match catalog.get_collection(ctx, ns)? {
                Some(collection) => collection.count(ctx.txn()?),
                None => Ok(0),
            }
        })
    }

    /// Drops collection `ns`, returning false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the drop fails.
    pub fn drop_collection(&self, ns: &str) -> CoreResult<bool> {
        let namespace = Namespace::parse(ns)?;
        self.run(self.connect(), namespace.db(), Access::Write, |ctx, catalog| {
            catalog.drop_collection(ctx, ns)
        })
    }

    /// Drops every collection of database `db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the drop fails.
    pub fn drop_database(&self, db: &str) -> CoreResult<()> {
        self.run(self.connect(), db, Access::Exclusive, |ctx, catalog| catalog.drop(ctx))
    }

    /// Lists the namespaces of database `db`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn collection_names(&self, db: &str) -> CoreResult<Vec<String>> {
        let mut names = self.run(self.connect(), db, Access::Read, |ctx, catalog| {
            catalog.get_namespaces(ctx)
        })?;
        names.sort();
        Ok(names)
    }

    // === Aggregation ===

    /// Runs an `aggregate` command document against database `db`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed command or a failing pipeline.
    pub fn aggregate(&self, db: &str, command: &Document) -> CoreResult<Document> {
        let command = AggregateCommand::parse(command)?;
        let ns = Namespace::new(db, command.collection())?;
        let reply = self.run_aggregate(&ns, &command, &ExpressionContext::detached())?;
        Ok(reply.into_document())
    }

    /// Runs a parsed aggregate command over `ns`.
    ///
    /// If the pipeline ends in `$out`, its output is inserted into the
    /// target collection of the same database.
    ///
    /// # Errors
    ///
    /// Returns an error for a failing pipeline or `$out` write.
    pub fn run_aggregate(
        &self,
        ns: &Namespace,
        command: &AggregateCommand,
        ctx: &ExpressionContext,
    ) -> CoreResult<AggregateReply> {
        let description = Document::new().with("$cursor", Document::new().with("ns", ns.as_str()));
        let reply = command.execute(ctx, description, self.config.verify_round_trip, |ctx| {
            self.cursor_source(ns, ctx)
        })?;

        if let AggregateReply::Results {
            documents,
            out: Some(target),
        } = &reply
        {
            let target = Namespace::new(ns.db(), target)?;
            self.insert(target.as_str(), documents.iter().cloned())?;
            tracing::info!(ns = %ns, out = %target, written = documents.len(), "aggregate wrote $out");
        }
        Ok(reply)
    }

    /// Opens the input of a pipeline over `ns`.
    ///
    /// The returned source holds a shared lease on the database until its
    /// scan ends or it is disposed. A missing collection reads as empty.
    ///
    /// # Errors
    ///
    /// Returns a lock timeout or a read error.
    pub fn cursor_source(&self, ns: &Namespace, ctx: &ExpressionContext) -> CoreResult<Box<dyn DocumentSource>> {
        let lease = self.locks.acquire(ns.db(), LockLevel::Shared)?;
        let scan = self.run(self.connect(), ns.db(), Access::Read, |op, catalog| {
            match catalog.get_collection(op, ns.as_str())? {
                Some(collection) => Ok(Some(collection.scan(op.txn()?)?)),
                None => Ok(None),
            }
        })?;
        Ok(match scan {
            Some(scan) => Box::new(CursorSource::new(ns.as_str(), scan, lease, ctx.clone())),
            None => Box::new(ArraySource::new(Vec::new(), ctx.clone())),
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("catalogs", &self.catalogs.read().len())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        tracing::debug!(path = ?self.path(), "closing database");
    }
}
