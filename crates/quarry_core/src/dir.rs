//! On-disk layout of a Quarry store.
//!
//! ```text
//! <root>/
//! ├─ LOCK                  # held by the owning process
//! └─ data/
//!    ├─ test.ns            # catalog metadata of database `test`
//!    └─ test.users$data    # documents of collection `test.users`
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DATA_DIR: &str = "data";

/// A store root owned by this process until dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Claims the store rooted at `path`, creating the root when
    /// `create_if_missing` is set.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when the root is absent (and may not be created)
    /// or is not a directory; `DatabaseLocked` when another process owns it.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CoreError::invalid_operation(format!(
                    "store root {} is not a directory",
                    path.display()
                )))
            }
            Err(_) if create_if_missing => fs::create_dir_all(path)?,
            Err(_) => {
                return Err(CoreError::invalid_operation(format!(
                    "no store at {}",
                    path.display()
                )))
            }
        }

        let lock_file = claim(&path.join(LOCK_FILE))?;
        tracing::debug!(path = %path.display(), "claimed store root");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Store root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory of the dictionary logs.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_DIR)
    }
}

fn claim(lock_path: &Path) -> CoreResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;
    file.try_lock_exclusive().map_err(|_| CoreError::DatabaseLocked)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("db");
        let db_dir = DatabaseDir::open(&root, true).unwrap();
        assert!(root.join(LOCK_FILE).exists());
        assert_eq!(db_dir.data_path(), root.join("data"));
        assert_eq!(db_dir.path(), root);
    }

    #[test]
    fn missing_root_without_create_fails() {
        let dir = tempdir().unwrap();
        let result = DatabaseDir::open(&dir.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn second_claim_is_locked_out() {
        let dir = tempdir().unwrap();
        let _first = DatabaseDir::open(dir.path(), true).unwrap();
        assert!(matches!(
            DatabaseDir::open(dir.path(), true),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DatabaseDir::open(&file, true),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(DatabaseDir::open(dir.path(), true).unwrap());
        assert!(DatabaseDir::open(dir.path(), true).is_ok());
    }
}
