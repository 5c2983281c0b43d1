//! # Quarry Storage
//!
//! Transactional dictionary storage for Quarry.
//!
//! A storage [`Environment`] holds named [`Dictionary`]s: ordered byte-keyed
//! tables whose every read and write runs inside a [`Transaction`]. The
//! layer above keeps one metadata dictionary per database and one data
//! dictionary per collection.
//!
//! ## Guarantees
//!
//! - Writes are invisible to other transactions until commit
//! - A read-modify-write read takes the row lock, so two writers of the
//!   same key serialize
//! - Creating a dictionary is transactional: aborting removes it
//! - Removing a dictionary takes effect at commit
//! - A dictionary created after a transaction's snapshot cannot be opened
//!   by that transaction ([`StorageError::DictionaryTooNew`])
//!
//! ## Backends
//!
//! Each dictionary persists as an append-only log of commit frames (see
//! [`log`]) on a [`StorageBackend`]:
//!
//! - [`MemoryBackend`] - ephemeral, for tests and in-memory environments
//! - [`FileBackend`] - one file per dictionary

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dictionary;
mod env;
mod error;
mod file;
pub mod log;
mod memory;
mod txn;

pub use backend::StorageBackend;
pub use dictionary::{Dictionary, DictionaryCursor, LockMode, PutMode};
pub use env::{EnvConfig, Environment};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use txn::{Transaction, TxnId, TxnState};
