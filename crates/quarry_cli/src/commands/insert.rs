//! Insert command implementation.

use super::CliError;
use quarry_codec::Document;
use quarry_core::Database;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Inserts every line of `file` into `ns`, creating the data directory if
/// needed. Blank lines are skipped.
pub fn run(path: &Path, ns: &str, file: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(file)?))
    };
    let docs = read_documents(reader)?;

    let db = Database::open(path)?;
    let ids = db.insert(ns, docs)?;
    tracing::debug!(ns, count = ids.len(), "insert finished");
    Ok(ids.len())
}

fn read_documents(reader: impl BufRead) -> Result<Vec<Document>, Box<dyn std::error::Error>> {
    let mut docs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc = Document::from_json_str(&line).map_err(|err| CliError::BadDocument {
            line: index + 1,
            message: err.to_string(),
        })?;
        docs.push(doc);
    }
    Ok(docs)
}
