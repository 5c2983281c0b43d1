//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random values, documents, namespaces
//! and well-formed pipelines.

use proptest::prelude::*;
use quarry_codec::{Document, Value};

/// Strategy for valid database names.
pub fn database_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for valid, non-system collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("system collections are reserved", |s| !s.starts_with("system"))
}

/// Strategy for `<db>.<collection>` namespaces.
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    (database_name_strategy(), collection_name_strategy()).prop_map(|(db, coll)| format!("{db}.{coll}"))
}

/// Strategy for scalar values of every type.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        (-1.0e6..1.0e6f64).prop_map(Value::Double),
        "[a-z]{0,8}".prop_map(Value::String),
        (0i64..4_102_444_800_000).prop_map(Value::Date),
    ]
}

/// Strategy for values, nesting arrays and documents a few levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-d]", inner), 0..4)
                .prop_map(|fields| Value::Document(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for documents over the fields `a` to `d`.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::vec(("[a-d]", value_strategy()), 0..5).prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for documents `{a: <int>, b: <small int>}` where either field
/// may be missing; the input pipelines from [`pipeline_strategy`] expect.
pub fn numeric_document_strategy() -> impl Strategy<Value = Document> {
    (prop::option::of(-50i32..50), prop::option::of(0i32..4)).prop_map(|(a, b)| {
        let mut doc = Document::new();
        if let Some(a) = a {
            doc.insert("a", a);
        }
        if let Some(b) = b {
            doc.insert("b", b);
        }
        doc
    })
}

fn stage(json: String) -> Value {
    Value::from_json_str(&json).expect("generated stage is valid JSON")
}

/// Strategy for one stage over [`numeric_document_strategy`] documents.
pub fn stage_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-50i32..50).prop_map(|n| stage(format!(r#"{{"$match": {{"a": {{"$gt": {n}}}}}}}"#))),
        (0i32..4).prop_map(|n| stage(format!(r#"{{"$match": {{"b": {n}}}}}"#))),
        (1i64..20).prop_map(|n| stage(format!(r#"{{"$limit": {n}}}"#))),
        (0i64..10).prop_map(|n| stage(format!(r#"{{"$skip": {n}}}"#))),
        prop::bool::ANY.prop_map(|asc| {
            let dir = if asc { 1 } else { -1 };
            stage(format!(r#"{{"$sort": {{"a": {dir}, "b": 1}}}}"#))
        }),
        Just(stage(
            r#"{"$group": {"_id": "$b", "n": {"$sum": 1}, "top": {"$max": "$a"}, "low": {"$min": "$a"}, "first": {"$first": "$a"}}}"#
                .to_string()
        )),
        Just(stage(r#"{"$project": {"a": 1, "b": 1, "twice": {"$multiply": ["$a", 2]}}}"#.to_string())),
    ]
}

/// Strategy for pipelines of up to `max_len` stages.
pub fn pipeline_strategy(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(stage_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::pipeline::{ExpressionContext, Pipeline};
    use quarry_core::Namespace;

    proptest! {
        #[test]
        fn namespaces_parse(ns in namespace_strategy()) {
            let parsed = Namespace::parse(&ns).unwrap();
            prop_assert!(!parsed.is_system());
        }

        #[test]
        fn generated_pipelines_parse(pipeline in pipeline_strategy(6)) {
            prop_assert!(Pipeline::parse(&pipeline, ExpressionContext::detached()).is_ok());
        }

        #[test]
        fn value_order_is_antisymmetric(a in value_strategy(), b in value_strategy()) {
            prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        }
    }
}
