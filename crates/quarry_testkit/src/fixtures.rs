//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use quarry_codec::Document;
use quarry_core::{Config, Database};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Lock timeout used by test databases; short enough that a leaked lock
/// fails a test quickly.
pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration used by test databases.
pub fn test_config() -> Config {
    Config::new()
        .lock_timeout(TEST_LOCK_TIMEOUT)
        .sync_on_commit(false)
        .verify_round_trip(true)
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory_with_config(test_config()),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(temp_dir.path(), test_config())
            .expect("Failed to open file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes and reopens a file-based database, keeping its directory.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory database or if the reopen fails.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("only file databases can be reopened");
        drop(self.db);
        let db = Database::open_with_config(temp_dir.path(), test_config())
            .expect("Failed to reopen file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path").to_path_buf();
    f(&test_db.db, &path)
}

/// Returns `count` documents `{n, parity, label}` with `n` from 0.
pub fn sample_documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let n = i32::try_from(i).expect("sample count fits in i32");
            Document::new()
                .with("n", n)
                .with("parity", if n % 2 == 0 { "even" } else { "odd" })
                .with("label", format!("doc-{n:04}"))
        })
        .collect()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Products sold in [`sales_database`], in order of first appearance.
    pub const PRODUCTS: [&str; 3] = ["pen", "ink", "pad"];

    /// Creates a database whose `shop.sales` collection holds `count`
    /// sales `{_id, item, qty, price}` cycling through [`PRODUCTS`].
    pub fn sales_database(count: usize) -> TestDatabase {
        let db = TestDatabase::memory();
        let sales = (0..count).map(|i| {
            let n = i32::try_from(i).expect("sale count fits in i32");
            Document::new()
                .with("_id", n)
                .with("item", PRODUCTS[i % PRODUCTS.len()])
                .with("qty", n % 5 + 1)
                .with("price", f64::from(n % 7) + 0.5)
        });
        db.insert("shop.sales", sales).expect("Failed to seed sales");
        db
    }

    /// Creates a database with collections `test.c0` .. `test.c{n-1}`.
    pub fn many_collections(n: usize) -> TestDatabase {
        let db = TestDatabase::memory();
        for i in 0..n {
            db.create_collection(&format!("test.c{i}"), Document::new())
                .expect("Failed to create collection");
        }
        db
    }
}

#[cfg(test)]
mod tests {
    use super::scenarios::*;
    use super::*;

    #[test]
    fn memory_database_has_no_path() {
        assert!(TestDatabase::memory().path().is_none());
    }

    #[test]
    fn file_database_survives_reopen() {
        let db = TestDatabase::file();
        db.insert("test.items", sample_documents(4)).unwrap();
        let db = db.reopen();
        assert_eq!(db.count("test.items").unwrap(), 4);
    }

    #[test]
    fn sample_documents_are_numbered() {
        let docs = sample_documents(3);
        assert_eq!(docs[2].to_string(), r#"{"n":2,"parity":"even","label":"doc-0002"}"#);
    }

    #[test]
    fn scenarios_populate() {
        assert_eq!(sales_database(10).count("shop.sales").unwrap(), 10);
        let names = many_collections(3).collection_names("test").unwrap();
        assert!(names.contains(&"test.c2".to_string()));
    }

    #[test]
    fn with_file_db_passes_path() {
        with_file_db(|db, path| {
            assert_eq!(db.path(), Some(path));
        });
    }
}
