//! Error types for Quarry core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in catalog, transaction and pipeline operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] quarry_storage::StorageError),

    /// Value conversion or encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] quarry_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller holds a read lock but the operation needs the write lock.
    ///
    /// The caller is expected to abort, take the write lock and run the
    /// whole operation again.
    #[error("retry with write lock: {reason}")]
    RetryWithWriteLock {
        /// What needed the write lock.
        reason: String,
    },

    /// A dictionary was created after the transaction's snapshot began.
    #[error("{ns} was created after this transaction started; restart the transaction")]
    SnapshotTooNew {
        /// The namespace or dictionary that is too new.
        ns: String,
    },

    /// Malformed input from the user, such as a bad pipeline stage.
    #[error("{message} (code {code})")]
    User {
        /// Numeric error code.
        code: u32,
        /// Description of the problem.
        message: String,
    },

    /// The operation observed its interrupt flag.
    #[error("operation was interrupted")]
    Interrupted,

    /// A collection with this namespace already exists.
    #[error("namespace already exists: {ns}")]
    NamespaceExists {
        /// The namespace.
        ns: String,
    },

    /// The collection does not exist.
    #[error("collection not found: {ns}")]
    CollectionNotFound {
        /// The namespace.
        ns: String,
    },

    /// The collection is being bulk loaded by another connection.
    #[error("collection {ns} is being bulk loaded by connection {owner}")]
    BulkLoadConflict {
        /// The namespace.
        ns: String,
        /// Connection that owns the bulk load.
        owner: u64,
    },

    /// A lock precondition was violated.
    #[error("{resource} is not {required} locked")]
    LockNotHeld {
        /// Locked resource (database name).
        resource: String,
        /// Required level, `"read"` or `"write"`.
        required: &'static str,
    },

    /// Waiting for a database lock took too long.
    #[error("lock wait on {resource} timed out after {waited:?}")]
    LockTimeout {
        /// Locked resource (database or dictionary name).
        resource: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The string is not a valid `db.collection` namespace.
    #[error("invalid namespace {ns:?}: {reason}")]
    InvalidNamespace {
        /// The rejected namespace.
        ns: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// An internal invariant was violated; the operation cannot continue.
    #[error("fatal: {message}")]
    Fatal {
        /// Description of the violation.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,
}

impl CoreError {
    /// Creates a user error with a numeric code.
    pub fn user(code: u32, message: impl Into<String>) -> Self {
        Self::User {
            code,
            message: message.into(),
        }
    }

    /// Creates a retry-with-write-lock signal.
    pub fn retry_with_write_lock(reason: impl Into<String>) -> Self {
        Self::RetryWithWriteLock {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true if running the operation again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetryWithWriteLock { .. }
            | Self::SnapshotTooNew { .. }
            | Self::LockTimeout { .. } => true,
            Self::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the error indicates broken state rather than bad input.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Fatal { .. } | Self::LockNotHeld { .. } | Self::Io(_) => true,
            Self::Storage(err) => !err.is_retryable(),
            _ => false,
        }
    }

    /// Returns the numeric user-facing code, if the error has one.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::User { code, .. } => Some(*code),
            Self::BulkLoadConflict { .. } => Some(16878),
            Self::Codec(err) => err.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_codec::CodecError;
    use quarry_storage::StorageError;

    #[test]
    fn classification() {
        assert!(CoreError::retry_with_write_lock("creating db").is_retryable());
        assert!(CoreError::SnapshotTooNew { ns: "a.b".into() }.is_retryable());
        assert!(!CoreError::Interrupted.is_retryable());
        assert!(!CoreError::Interrupted.is_fatal());
        assert!(CoreError::fatal("cache not empty").is_fatal());
        assert!(CoreError::from(StorageError::corrupted("crc")).is_fatal());
        assert!(!CoreError::from(StorageError::DictionaryTooNew { name: "x".into() }).is_fatal());
    }

    #[test]
    fn codes() {
        assert_eq!(CoreError::user(15958, "the limit must be positive").code(), Some(15958));
        assert_eq!(
            CoreError::BulkLoadConflict {
                ns: "a.b".into(),
                owner: 3
            }
            .code(),
            Some(16878)
        );
        assert_eq!(
            CoreError::from(CodecError::conversion(16006, "can't convert")).code(),
            Some(16006)
        );
        assert_eq!(CoreError::Interrupted.code(), None);
    }

    #[test]
    fn user_error_display_includes_code() {
        let err = CoreError::user(15999, "invalid operator '$foo'");
        assert_eq!(err.to_string(), "invalid operator '$foo' (code 15999)");
    }
}
