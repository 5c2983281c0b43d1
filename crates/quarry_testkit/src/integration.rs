//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors every write in an in-process model and
//! checks the database against it, and helpers that compare pipeline
//! execution modes.

use quarry_codec::{Document, Value};
use quarry_core::pipeline::{AggregateCommand, AggregateReply, ArraySource, ExpressionContext, Pipeline};
use quarry_core::{CoreError, CoreResult, Database, Namespace};
use std::collections::BTreeMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The database instance.
    pub db: Database,
    /// Expected contents per namespace, in insertion order.
    model: BTreeMap<String, Vec<Document>>,
}

impl IntegrationHarness {
    /// Creates a new integration harness with an in-memory database.
    pub fn new() -> Self {
        Self {
            db: Database::open_in_memory_with_config(crate::test_config()),
            model: BTreeMap::new(),
        }
    }

    /// Inserts documents with explicit `_id`s and tracks them.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    pub fn insert(&mut self, ns: &str, docs: Vec<Document>) {
        let tracked = self.model.entry(ns.to_string()).or_default();
        let mut with_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut stored = Document::new().with("_id", Value::int_or_long(tracked.len() as i64));
            for (name, value) in doc.iter().filter(|(name, _)| *name != "_id") {
                stored.insert(name, value.clone());
            }
            tracked.push(stored.clone());
            with_ids.push(stored);
        }
        self.db.insert(ns, with_ids).expect("Failed to insert documents");
    }

    /// Drops a collection and forgets it.
    ///
    /// # Panics
    ///
    /// Panics if the drop fails.
    pub fn drop_collection(&mut self, ns: &str) {
        self.db.drop_collection(ns).expect("Failed to drop collection");
        self.model.remove(ns);
    }

    /// Checks every tracked collection against the database.
    ///
    /// # Panics
    ///
    /// Panics on the first mismatch.
    pub fn verify_all(&self) {
        for (ns, expected) in &self.model {
            let actual = self.db.find(ns).expect("Failed to read collection");
            assert_eq!(&actual, expected, "contents of {ns} differ");
        }
    }

    /// Returns the tracked documents of `ns`.
    pub fn expected(&self, ns: &str) -> &[Document] {
        self.model.get(ns).map_or(&[], Vec::as_slice)
    }

    /// Returns the number of tracked collections.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `pipeline` over `input` directly, without a collection.
///
/// # Errors
///
/// Returns any parse or execution error.
pub fn run_pipeline(pipeline: &[Value], input: Vec<Document>) -> CoreResult<Vec<Document>> {
    let ctx = ExpressionContext::detached();
    let mut parsed = Pipeline::parse(pipeline, ctx.clone())?;
    parsed.optimize()?;
    parsed.run(Box::new(ArraySource::new(input, ctx)))
}

/// Runs `pipeline` over `ns` once normally and once split, and returns the
/// two result lists.
///
/// # Errors
///
/// Returns the first error of either run.
pub fn run_both_ways(db: &Database, ns: &str, pipeline: &[Value]) -> CoreResult<(Vec<Document>, Vec<Document>)> {
    let namespace = Namespace::parse(ns)?;
    let mut results = Vec::with_capacity(2);
    for split in [false, true] {
        let command = AggregateCommand::new(namespace.coll(), pipeline.to_vec()).with_split(split);
        match db.run_aggregate(&namespace, &command, &ExpressionContext::detached())? {
            AggregateReply::Results { documents, .. } => results.push(documents),
            AggregateReply::Explain(_) => return Err(CoreError::fatal("explain reply without explain")),
        }
    }
    let split = results.pop().unwrap_or_default();
    let direct = results.pop().unwrap_or_default();
    Ok((direct, split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_documents, scenarios};

    #[test]
    fn harness_tracks_inserts_and_drops() {
        let mut harness = IntegrationHarness::new();
        harness.insert("test.a", sample_documents(3));
        harness.insert("test.b", sample_documents(2));
        harness.insert("test.a", sample_documents(1));
        assert_eq!(harness.expected("test.a").len(), 4);
        harness.verify_all();

        harness.drop_collection("test.b");
        assert_eq!(harness.tracked_count(), 1);
        assert!(harness.db.find("test.b").unwrap().is_empty());
        harness.verify_all();
    }

    #[test]
    fn split_and_direct_agree_on_sales() {
        let db = scenarios::sales_database(30);
        let pipeline = Value::from_json_str(
            r#"[
                {"$match": {"qty": {"$gte": 2}}},
                {"$group": {"_id": "$item", "units": {"$sum": "$qty"}, "prices": {"$addToSet": "$price"}, "ids": {"$push": "$_id"}}},
                {"$sort": {"units": -1}},
                {"$limit": 2}
            ]"#,
        )
        .unwrap();
        let (direct, split) = run_both_ways(&db, "shop.sales", pipeline.as_array().unwrap()).unwrap();
        assert_eq!(direct.len(), 2);
        assert_eq!(direct, split);
    }

    #[test]
    fn run_pipeline_without_collection() {
        let stages = Value::from_json_str(r#"[{"$match": {"parity": "odd"}}, {"$project": {"_id": 0, "n": 1}}]"#).unwrap();
        let out = run_pipeline(stages.as_array().unwrap(), sample_documents(4)).unwrap();
        assert_eq!(
            out,
            vec![Document::new().with("n", 1), Document::new().with("n", 3)]
        );
    }
}
