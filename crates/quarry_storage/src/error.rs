//! Error types for storage operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A dictionary log is corrupted.
    #[error("dictionary log corrupted: {0}")]
    Corrupted(String),

    /// The dictionary handle has been closed.
    #[error("dictionary is closed: {name}")]
    Closed {
        /// Name of the dictionary.
        name: String,
    },

    /// The dictionary does not exist and was not allowed to be created.
    #[error("dictionary does not exist: {name}")]
    NeedsCreate {
        /// Name of the dictionary.
        name: String,
    },

    /// The dictionary was created after the transaction's snapshot.
    #[error("dictionary {name} is too new for the transaction snapshot")]
    DictionaryTooNew {
        /// Name of the dictionary.
        name: String,
    },

    /// A no-overwrite put found an existing row.
    #[error("key already exists in dictionary {name}")]
    KeyExists {
        /// Name of the dictionary.
        name: String,
    },

    /// Waiting for a row lock took too long.
    #[error("row lock wait timed out after {waited:?} in dictionary {name}")]
    LockTimeout {
        /// Name of the dictionary.
        name: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A write was attempted in a read-only transaction.
    #[error("transaction {txn} is read-only")]
    ReadOnly {
        /// Transaction id.
        txn: u64,
    },

    /// The dictionary name cannot be used as a file name.
    #[error("invalid dictionary name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The transaction is no longer active.
    #[error("transaction {txn} is not active")]
    TransactionInactive {
        /// Transaction id.
        txn: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if the operation may succeed when the transaction is retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DictionaryTooNew { .. } | Self::LockTimeout { .. })
    }
}
