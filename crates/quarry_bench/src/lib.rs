//! Shared inputs for the Quarry benchmarks.

use quarry_codec::{Document, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ITEMS: [&str; 8] = ["pen", "ink", "pad", "nib", "cap", "clip", "tape", "glue"];

/// Generates `count` sale documents `{_id, item, qty, price, tags}` from a
/// fixed seed, so every run sees the same input.
pub fn sales(count: usize) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    (0..count)
        .map(|i| {
            let tags: Vec<Value> = (0..rng.gen_range(0..4usize))
                .map(|_| Value::from(ITEMS[rng.gen_range(0..ITEMS.len())]))
                .collect();
            Document::new()
                .with("_id", Value::int_or_long(i as i64))
                .with("item", ITEMS[rng.gen_range(0..ITEMS.len())])
                .with("qty", rng.gen_range(1..20i32))
                .with("price", f64::from(rng.gen_range(1..500i32)) / 10.0)
                .with("tags", tags)
        })
        .collect()
}

/// Parses a JSON array of stages.
///
/// # Panics
///
/// Panics on malformed JSON or a non-array.
pub fn stages(json: &str) -> Vec<Value> {
    Value::from_json_str(json)
        .ok()
        .and_then(|value| value.as_array().map(<[Value]>::to_vec))
        .expect("stages must be a JSON array")
}

/// Builds a document nested `depth` levels deep with `width` fields per level.
pub fn nested_document(depth: usize, width: usize) -> Document {
    (0..width)
        .map(|i| {
            let value = if depth == 0 {
                Value::from(format!("leaf-{i}"))
            } else {
                Value::Document(nested_document(depth - 1, width))
            };
            (format!("f{i}"), value)
        })
        .collect()
}
