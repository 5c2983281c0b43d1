//! Drop command implementation.

use super::open_existing;
use std::path::Path;

/// Drops database `db` and every collection in it.
pub fn run(path: &Path, db: &str) -> Result<(), Box<dyn std::error::Error>> {
    let database = open_existing(path)?;
    let before = database.collection_names(db)?.len();
    database.drop_database(db)?;
    tracing::info!(db, collections = before, "dropped database");
    Ok(())
}
