//! Property tests for pipeline parsing, optimization and splitting.

use proptest::prelude::*;
use quarry_codec::Value;
use quarry_core::pipeline::{ExpressionContext, Pipeline};
use quarry_testkit::{numeric_document_strategy, pipeline_strategy, run_both_ways, run_pipeline, IntegrationHarness};

fn declaration(spec: &[Value]) -> Vec<Value> {
    let mut pipeline = Pipeline::parse(spec, ExpressionContext::detached()).unwrap();
    pipeline.optimize().unwrap();
    pipeline.to_declaration()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn split_matches_direct(
        docs in prop::collection::vec(numeric_document_strategy(), 0..40),
        pipeline in pipeline_strategy(5),
    ) {
        let mut harness = IntegrationHarness::new();
        harness.insert("prop.items", docs);
        let (direct, split) = run_both_ways(&harness.db, "prop.items", &pipeline).unwrap();
        prop_assert_eq!(direct, split);
    }

    #[test]
    fn declaration_reparses_to_itself(pipeline in pipeline_strategy(6)) {
        let first = declaration(&pipeline);
        let second = declaration(&first);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn optimizing_keeps_results(
        docs in prop::collection::vec(numeric_document_strategy(), 0..30),
        pipeline in pipeline_strategy(5),
    ) {
        let ctx = ExpressionContext::detached();
        let plain = Pipeline::parse(&pipeline, ctx.clone()).unwrap();
        let unoptimized = plain
            .run(Box::new(quarry_core::pipeline::ArraySource::new(docs.clone(), ctx)))
            .unwrap();
        prop_assert_eq!(run_pipeline(&pipeline, docs).unwrap(), unoptimized);
    }
}
