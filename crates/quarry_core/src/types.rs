//! Core type definitions for Quarry.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Identifier of a client connection.
///
/// Connection ids are assigned by [`Database::connect`](crate::Database::connect)
/// and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a new connection ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// A fully qualified collection name, `<database>.<collection>`.
///
/// The database part ends at the first dot; the collection part may
/// contain further dots (`test.system.indexes`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    full: String,
    dot: usize,
}

impl Namespace {
    /// Parses and validates a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidNamespace`] if either part is empty or
    /// contains characters that cannot appear in it.
    pub fn parse(ns: &str) -> CoreResult<Self> {
        let invalid = |reason| CoreError::InvalidNamespace {
            ns: ns.to_string(),
            reason,
        };
        let dot = ns.find('.').ok_or_else(|| invalid("missing '.' separator"))?;
        let (db, coll) = (&ns[..dot], &ns[dot + 1..]);
        validate_database_name(db).map_err(invalid)?;
        if coll.is_empty() {
            return Err(invalid("empty collection name"));
        }
        if coll.contains(['$', '\0']) {
            return Err(invalid("collection names cannot contain '$' or NUL"));
        }
        Ok(Self {
            full: ns.to_string(),
            dot,
        })
    }

    /// Builds a namespace from its two parts.
    ///
    /// # Errors
    ///
    /// Same as [`Namespace::parse`].
    pub fn new(db: &str, collection: &str) -> CoreResult<Self> {
        Self::parse(&format!("{db}.{collection}"))
    }

    /// Returns the database part.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.full[..self.dot]
    }

    /// Returns the collection part.
    #[must_use]
    pub fn coll(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// Returns the full `db.collection` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Returns another collection of the same database.
    #[must_use]
    pub fn sister(&self, collection: &str) -> String {
        format!("{}.{collection}", self.db())
    }

    /// Returns true for `system.*` collections.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll().starts_with("system.")
    }

    /// Returns true for the `system.indexes` collection.
    #[must_use]
    pub fn is_system_indexes(&self) -> bool {
        self.coll() == SYSTEM_INDEXES
    }

    /// Returns true for the `system.namespaces` collection.
    #[must_use]
    pub fn is_system_namespaces(&self) -> bool {
        self.coll() == SYSTEM_NAMESPACES
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Collection listing every namespace of a database.
pub const SYSTEM_NAMESPACES: &str = "system.namespaces";

/// Collection listing every index of a database.
pub const SYSTEM_INDEXES: &str = "system.indexes";

/// Checks that `db` can be used as a database name.
pub(crate) fn validate_database_name(db: &str) -> Result<(), &'static str> {
    if db.is_empty() {
        return Err("empty database name");
    }
    if db.contains([' ', '.', '/', '\\', '"', '$', '\0']) {
        return Err("database names cannot contain ' ', '.', '/', '\\', '\"', '$' or NUL");
    }
    Ok(())
}

/// Returns the database part of a lock resource or namespace.
pub(crate) fn database_of(resource: &str) -> &str {
    resource.split_once('.').map_or(resource, |(db, _)| db)
}
