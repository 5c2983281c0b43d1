//! Byte store behind a dictionary log.

use crate::error::StorageResult;

/// A low-level, append-only byte store holding one dictionary's log.
///
/// Backends do not interpret the bytes they hold. The dictionary layer
/// owns the record framing (see [`crate::log`]).
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended and not truncated
/// - after `sync` returns, appended data survives process termination
pub trait StorageBackend: Send + Sync {
    /// Reads the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Discards everything after `new_size`.
    ///
    /// Used to cut a torn tail found while replaying the log.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is past the end or the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
