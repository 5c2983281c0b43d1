//! Ordered documents.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An ordered list of named fields.
///
/// Field order is preserved: inserting an existing name replaces the value
/// in place, inserting a new name appends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty document with room for `capacity` fields.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder form of [`Document::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the value of field `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value of field `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Returns true if the document has a field called `name`.
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Follows a dotted path through nested documents.
    ///
    /// Arrays are not traversed.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = current.as_document()?.get(part)?;
        }
        Some(current)
    }

    /// Sets field `name`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Removes field `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Returns the first field.
    #[must_use]
    pub fn first(&self) -> Option<(&str, &Value)> {
        self.fields.first().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Orders documents field by field: names first, then values.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        for ((ka, va), (kb, vb)) in self.fields.iter().zip(&other.fields) {
            let ord = ka.cmp(kb).then_with(|| va.compare(vb));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.fields.len().cmp(&other.fields.len())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Self::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order_and_replaces_in_place() {
        let mut doc = Document::new().with("b", 1).with("a", 2);
        assert_eq!(doc.insert("b", 3), Some(Value::Int(1)));
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(doc.get("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn get_path_walks_nested_documents() {
        let doc = Document::new().with("a", Document::new().with("b", Document::new().with("c", 7)));
        assert_eq!(doc.get_path("a.b.c"), Some(&Value::Int(7)));
        assert_eq!(doc.get_path("a.x"), None);
        assert_eq!(doc.get_path("a.b.c.d"), None);
    }

    #[test]
    fn remove_returns_value() {
        let mut doc = Document::new().with("x", "y");
        assert_eq!(doc.remove("x"), Some(Value::from("y")));
        assert!(doc.is_empty());
        assert_eq!(doc.remove("x"), None);
    }

    #[test]
    fn compare_orders_by_names_then_values() {
        let a = Document::new().with("a", 1);
        let b = Document::new().with("a", 2);
        let c = Document::new().with("b", 0);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&c), Ordering::Less);
        assert_eq!(a.compare(&a.clone().with("z", 0)), Ordering::Less);
    }
}
