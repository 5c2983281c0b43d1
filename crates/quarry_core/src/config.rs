//! Database configuration.

use quarry_storage::EnvConfig;
use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Upper bound on waits for database locks and storage row locks.
    pub lock_timeout: Duration,

    /// Whether to sync dictionary logs on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to re-parse every pipeline from its declaration before running it.
    pub verify_round_trip: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            lock_timeout: Duration::from_secs(5),
            sync_on_commit: true,
            verify_round_trip: cfg!(debug_assertions),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the lock wait bound.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether pipelines are round-tripped through their declaration.
    #[must_use]
    pub const fn verify_round_trip(mut self, value: bool) -> Self {
        self.verify_round_trip = value;
        self
    }

    pub(crate) fn env_config(&self) -> EnvConfig {
        EnvConfig::new()
            .lock_timeout(self.lock_timeout)
            .sync_on_commit(self.sync_on_commit)
    }
}
