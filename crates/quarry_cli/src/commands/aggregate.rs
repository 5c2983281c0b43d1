//! Aggregate command implementation.

use super::{open_existing, CliError, Format};
use quarry_codec::Value;
use quarry_core::pipeline::{AggregateCommand, AggregateReply, ExpressionContext};
use quarry_core::Namespace;
use std::fmt::Write;
use std::path::Path;

/// Execution switches of the aggregate command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Run the shard and merge halves separately.
    pub split: bool,
    /// Describe instead of run.
    pub explain: bool,
}

/// Runs `pipeline` over `ns` and renders the reply.
pub fn run(
    path: &Path,
    ns: &str,
    pipeline: &str,
    options: Options,
    format: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let namespace = Namespace::parse(ns)?;
    let stages = match Value::from_json_str(pipeline)? {
        Value::Array(stages) => stages,
        _ => return Err(CliError::BadPipeline.into()),
    };
    let command = AggregateCommand::new(namespace.coll(), stages)
        .with_split(options.split)
        .with_explain(options.explain);

    let db = open_existing(path)?;
    let reply = db.run_aggregate(&namespace, &command, &ExpressionContext::detached())?;
    render(reply, format)
}

fn render(reply: AggregateReply, format: Format) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = String::new();
    match (format, reply) {
        (Format::Text, AggregateReply::Results { documents, .. }) => {
            for doc in documents {
                writeln!(out, "{doc}")?;
            }
        }
        (Format::Text, AggregateReply::Explain(doc)) => writeln!(out, "{doc}")?,
        (Format::Json, reply) => {
            let doc = reply.into_document();
            writeln!(out, "{}", serde_json::to_string_pretty(&doc.to_json())?)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_codec::Document;
    use quarry_core::Database;
    use tempfile::tempdir;

    fn seeded() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.insert(
            "shop.orders",
            (1..=4).map(|n| Document::new().with("_id", n).with("qty", n * 10)),
        )
        .unwrap();
        dir
    }

    #[test]
    fn prints_one_document_per_line() {
        let dir = seeded();
        let out = run(
            dir.path(),
            "shop.orders",
            r#"[{"$match": {"qty": {"$gte": 20}}}, {"$project": {"qty": 1}}, {"$limit": 2}]"#,
            Options::default(),
            "text",
        )
        .unwrap();
        assert_eq!(out, "{\"_id\":2,\"qty\":20}\n{\"_id\":3,\"qty\":30}\n");
    }

    #[test]
    fn split_and_json_output() {
        let dir = seeded();
        let out = run(
            dir.path(),
            "shop.orders",
            r#"[{"$group": {"_id": null, "total": {"$sum": "$qty"}}}]"#,
            Options {
                split: true,
                explain: false,
            },
            "json",
        )
        .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reply["result"][0]["total"], 100);
        assert_eq!(reply["ok"], 1);
    }

    #[test]
    fn rejects_bad_input() {
        let dir = seeded();
        let err = run(dir.path(), "shop.orders", r#"{"$limit": 1}"#, Options::default(), "text").unwrap_err();
        assert_eq!(err.to_string(), CliError::BadPipeline.to_string());
        assert!(run(dir.path(), "shop.orders", "[]", Options::default(), "yaml").is_err());
        assert!(run(&dir.path().join("absent"), "shop.orders", "[]", Options::default(), "text").is_err());
    }
}
