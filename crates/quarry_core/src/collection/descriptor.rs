//! Serialized collection metadata.

use crate::error::CoreResult;
use quarry_codec::{from_cbor, to_cbor, Document, Value};
use serde::{Deserialize, Serialize};

/// Name of the index every non-system collection has on `_id`.
pub const ID_INDEX_NAME: &str = "_id_";

/// One index of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within the collection.
    pub name: String,
    /// Key pattern, field name to direction.
    pub key: Document,
}

impl IndexSpec {
    /// The `_id_` index.
    #[must_use]
    pub fn id_index() -> Self {
        Self {
            name: ID_INDEX_NAME.to_string(),
            key: Document::new().with("_id", 1),
        }
    }

    /// Returns the `system.indexes` entry describing this index on `ns`.
    #[must_use]
    pub fn to_entry(&self, ns: &str) -> Document {
        Document::new()
            .with("ns", ns)
            .with("name", self.name.as_str())
            .with("key", self.key.clone())
    }
}

/// The metadata row value stored in a catalog under the namespace name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Full namespace.
    pub ns: String,
    /// Options given at creation.
    pub options: Document,
    /// Indexes of the collection.
    pub indexes: Vec<IndexSpec>,
}

impl CollectionDescriptor {
    /// Creates a descriptor. Non-system collections get the `_id_` index.
    #[must_use]
    pub fn new(ns: &str, options: Document, system: bool) -> Self {
        let indexes = if system {
            Vec::new()
        } else {
            vec![IndexSpec::id_index()]
        };
        Self {
            ns: ns.to_string(),
            options,
            indexes,
        }
    }

    /// Encodes the descriptor as a metadata row value.
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes a metadata row value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not hold a descriptor.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }

    /// Returns the `system.namespaces` entry for this collection.
    #[must_use]
    pub fn namespace_entry(&self) -> Document {
        let mut entry = Document::new().with("name", self.ns.as_str());
        if !self.options.is_empty() {
            entry.insert("options", Value::Document(self.options.clone()));
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_survives_encoding() {
        let descriptor =
            CollectionDescriptor::new("test.users", Document::new().with("capped", false), false);
        let bytes = descriptor.encode().unwrap();
        assert_eq!(CollectionDescriptor::decode(&bytes).unwrap(), descriptor);
    }

    #[test]
    fn system_collections_have_no_id_index() {
        let descriptor = CollectionDescriptor::new("test.system.indexes", Document::new(), true);
        assert!(descriptor.indexes.is_empty());
        let user = CollectionDescriptor::new("test.users", Document::new(), false);
        assert_eq!(user.indexes, vec![IndexSpec::id_index()]);
    }

    #[test]
    fn catalog_entries() {
        let descriptor = CollectionDescriptor::new("test.users", Document::new(), false);
        assert_eq!(descriptor.namespace_entry(), Document::new().with("name", "test.users"));
        let entry = IndexSpec::id_index().to_entry("test.users");
        assert_eq!(entry.get("name"), Some(&Value::from("_id_")));
        assert_eq!(entry.get("ns"), Some(&Value::from("test.users")));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(CollectionDescriptor::decode(&[0xff, 0x01]).is_err());
    }
}
