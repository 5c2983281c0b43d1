//! List command implementation.

use super::{open_existing, Format};
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

/// Collections of one database.
#[derive(Debug, Serialize)]
pub struct Listing {
    /// Database name.
    pub db: String,
    /// Per-collection entries, sorted by namespace.
    pub collections: Vec<CollectionEntry>,
}

/// One collection in a [`Listing`].
#[derive(Debug, Serialize)]
pub struct CollectionEntry {
    /// Full namespace.
    pub ns: String,
    /// Number of documents.
    pub documents: usize,
}

/// Lists the collections of `db` with their document counts.
pub fn run(path: &Path, db: &str, format: &str) -> Result<String, Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let database = open_existing(path)?;

    let mut listing = Listing {
        db: db.to_string(),
        collections: Vec::new(),
    };
    for ns in database.collection_names(db)? {
        let documents = database.count(&ns)?;
        listing.collections.push(CollectionEntry { ns, documents });
    }

    let mut out = String::new();
    match format {
        Format::Text => {
            for entry in &listing.collections {
                writeln!(out, "{}\t{}", entry.ns, entry.documents)?;
            }
        }
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?,
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_codec::Document;
    use quarry_core::Database;
    use tempfile::tempdir;

    #[test]
    fn lists_with_counts() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.insert("app.users", vec![Document::new(), Document::new()]).unwrap();
        }
        let out = run(dir.path(), "app", "text").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.contains(&"app.users\t2"));
        assert!(lines.iter().any(|l| l.starts_with("app.system.namespaces\t")));

        let json: serde_json::Value = serde_json::from_str(&run(dir.path(), "app", "json").unwrap()).unwrap();
        assert_eq!(json["db"], "app");
        let users = json["collections"]
            .as_array()
            .unwrap()
            .iter()
            .find(|entry| entry["ns"] == "app.users")
            .unwrap();
        assert_eq!(users["documents"], 2);
    }
}
