//! Per-transaction undo notes for catalog metadata.

use crate::catalog::CollectionCatalog;
use std::sync::Arc;

/// Undo actions registered by catalog mutations, applied when the owning
/// transaction aborts.
///
/// Namespace notes are applied before dictionary-creation notes: every
/// collection opened or created under a catalog must be closed before the
/// catalog's own metadata dictionary can be forgotten.
#[derive(Default)]
pub struct RollbackLedger {
    namespaces: Vec<(Arc<CollectionCatalog>, String)>,
    creates: Vec<Arc<CollectionCatalog>>,
}

impl RollbackLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `ns` of `catalog` changed in this transaction.
    pub fn note_namespace(&mut self, catalog: &Arc<CollectionCatalog>, ns: &str) {
        let known = self
            .namespaces
            .iter()
            .any(|(c, n)| Arc::ptr_eq(c, catalog) && n == ns);
        if !known {
            self.namespaces.push((Arc::clone(catalog), ns.to_string()));
        }
    }

    /// Records that this transaction created `catalog`'s metadata dictionary.
    pub fn note_create(&mut self, catalog: &Arc<CollectionCatalog>) {
        if !self.creates.iter().any(|c| Arc::ptr_eq(c, catalog)) {
            self.creates.push(Arc::clone(catalog));
        }
    }

    /// Returns true if nothing was noted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.creates.is_empty()
    }

    /// Returns the number of namespace notes.
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Applies every undo action. Failures are logged; the remaining
    /// actions still run.
    pub fn apply(self) {
        for (catalog, ns) in self.namespaces {
            if let Err(err) = catalog.rollback_ns(&ns) {
                tracing::error!(ns = %ns, error = %err, "namespace rollback failed");
            }
        }
        for catalog in self.creates {
            if let Err(err) = catalog.rollback_create() {
                tracing::error!(db = catalog.database(), error = %err, "catalog rollback failed");
            }
        }
    }
}

impl std::fmt::Debug for RollbackLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces: Vec<&str> = self.namespaces.iter().map(|(_, ns)| ns.as_str()).collect();
        let creates: Vec<&str> = self.creates.iter().map(|c| c.database()).collect();
        f.debug_struct("RollbackLedger")
            .field("namespaces", &namespaces)
            .field("creates", &creates)
            .finish()
    }
}
