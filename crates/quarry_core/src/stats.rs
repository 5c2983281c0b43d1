//! Catalog statistics.
//!
//! # Usage
//!
//! ```rust
//! use quarry_core::{Database, Document};
//!
//! let db = Database::open_in_memory();
//! let mut ctx = db.connect();
//! db.insert("test.users", vec![Document::new().with("name", "ada")]).unwrap();
//!
//! let stats = db.catalog("test").unwrap().stats().snapshot();
//! assert_eq!(stats.constructed, 3); // users, system.namespaces, system.indexes
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a [`CollectionCatalog`](crate::catalog::CollectionCatalog).
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct CatalogStats {
    /// Calls to `get_collection`.
    lookups: AtomicU64,
    /// Lookups answered from the in-memory cache.
    cache_hits: AtomicU64,
    /// Handles inserted into the cache by `open_ns`.
    opens: AtomicU64,
    /// Collection objects constructed, by open or create.
    constructed: AtomicU64,
    /// Handles removed from the cache and closed.
    closes: AtomicU64,
}

impl CatalogStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_constructed(&self) {
        self.constructed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of lookups.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of opens from metadata.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Returns the number of constructed collection objects.
    pub fn constructed(&self) -> u64 {
        self.constructed.load(Ordering::Relaxed)
    }

    /// Returns the number of closes.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups(),
            cache_hits: self.cache_hits(),
            opens: self.opens(),
            constructed: self.constructed(),
            closes: self.closes(),
        }
    }
}

/// Plain copy of [`CatalogStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls to `get_collection`.
    pub lookups: u64,
    /// Lookups answered from the cache.
    pub cache_hits: u64,
    /// Opens from metadata.
    pub opens: u64,
    /// Collection objects constructed.
    pub constructed: u64,
    /// Handles closed.
    pub closes: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups served from the cache, or 0 without lookups.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CatalogStats::new();
        stats.record_lookup(false);
        stats.record_lookup(true);
        stats.record_lookup(true);
        stats.record_open();
        stats.record_constructed();
        stats.record_close();

        let snap = stats.snapshot();
        assert_eq!(snap.lookups, 3);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.opens, 1);
        assert_eq!(snap.constructed, 1);
        assert_eq!(snap.closes, 1);
        assert!((snap.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_ratio_is_zero() {
        assert_eq!(StatsSnapshot::default().hit_ratio(), 0.0);
    }
}
