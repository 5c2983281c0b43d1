//! # Quarry Core
//!
//! Collection catalog and aggregation engine for Quarry.
//!
//! This crate provides:
//! - The per-database [`CollectionCatalog`]: a transactional directory of
//!   collections whose open handles are cached and shared by connections
//! - [`OperationContext`]: the locks, transaction stack and rollback
//!   ledger one operation carries
//! - The aggregation [`pipeline`]: expressions with constant folding and
//!   field-range extraction, lazily evaluated stages, accumulators with a
//!   merge mode, and shard/merge split execution
//! - The [`Database`] facade tying them together
//!
//! ## Quick start
//!
//! ```
//! use quarry_core::{Database, Document};
//!
//! let db = Database::open_in_memory();
//! db.insert("test.scores", (1..=4).map(|n| Document::new().with("n", n)))?;
//!
//! let command = Document::from_json_str(
//!     r#"{"aggregate": "scores", "pipeline": [{"$group": {"_id": null, "total": {"$sum": "$n"}}}]}"#,
//! )?;
//! let reply = db.aggregate("test", &command)?;
//! assert_eq!(reply.to_string(), r#"{"result":[{"_id":null,"total":10}],"ok":1}"#);
//! # Ok::<(), quarry_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod collection;
mod config;
mod context;
mod database;
mod dir;
mod error;
pub mod lock;
pub mod pipeline;
mod rollback;
mod stats;
mod types;

pub use catalog::CollectionCatalog;
pub use collection::{Collection, CollectionDescriptor, CollectionScan, OpenState};
pub use config::Config;
pub use context::OperationContext;
pub use database::{Access, Database};
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult};
pub use lock::{LockGuard, LockLevel, LockManager};
pub use rollback::RollbackLedger;
pub use stats::{CatalogStats, StatsSnapshot};
pub use types::{ConnectionId, Namespace, SYSTEM_INDEXES, SYSTEM_NAMESPACES};

pub use quarry_codec::{Document, Value};
