//! # Quarry Testkit
//!
//! Test utilities for Quarry.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - Cross-crate integration test helpers
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use quarry_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     db.insert("test.items", sample_documents(3)).unwrap();
//!     assert_eq!(db.count("test.items").unwrap(), 3);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
