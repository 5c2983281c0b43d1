//! CLI command implementations.

pub mod aggregate;
pub mod drop;
pub mod insert;
pub mod list;

use quarry_core::{Config, Database};
use std::path::Path;
use thiserror::Error;

/// Errors in command-line input, as opposed to database errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A line of an input file is not a JSON object.
    #[error("line {line}: {message}")]
    BadDocument {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },

    /// The pipeline argument is not a JSON array.
    #[error("pipeline must be a JSON array of stage objects")]
    BadPipeline,

    /// Unsupported `--format` value.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),
}

/// Output format of commands that print documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One compact JSON document per line.
    Text,
    /// The whole reply as pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Opens an existing data directory.
pub(crate) fn open_existing(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    Ok(Database::open_with_config(path, Config::default().create_if_missing(false))?)
}
