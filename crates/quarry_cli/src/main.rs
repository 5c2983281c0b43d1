//! Quarry CLI
//!
//! Command-line access to a Quarry data directory.
//!
//! # Commands
//!
//! - `insert` - Insert JSON documents, one per line
//! - `aggregate` - Run an aggregation pipeline
//! - `list` - List the collections of a database
//! - `drop` - Drop a database

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Quarry command-line tools.
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert documents from a JSON-lines file (`-` for stdin)
    Insert {
        /// Target namespace, `<db>.<collection>`
        ns: String,

        /// File with one JSON object per line
        file: PathBuf,
    },

    /// Run an aggregation pipeline over a collection
    Aggregate {
        /// Input namespace, `<db>.<collection>`
        ns: String,

        /// Pipeline as a JSON array of stage objects
        pipeline: String,

        /// Run the shard and merge halves one after the other
        #[arg(long)]
        split: bool,

        /// Describe the stages instead of running them
        #[arg(long)]
        explain: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the collections of a database
    List {
        /// Database name
        db: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop a database and every collection in it
    Drop {
        /// Database name
        db: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Insert { ns, file } => {
            let path = cli.path.ok_or("Data directory required for insert")?;
            let inserted = commands::insert::run(&path, &ns, &file)?;
            println!("inserted {inserted} documents into {ns}");
        }
        Commands::Aggregate {
            ns,
            pipeline,
            split,
            explain,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for aggregate")?;
            let options = commands::aggregate::Options { split, explain };
            let output = commands::aggregate::run(&path, &ns, &pipeline, options, &format)?;
            print!("{output}");
        }
        Commands::List { db, format } => {
            let path = cli.path.ok_or("Data directory required for list")?;
            print!("{}", commands::list::run(&path, &db, &format)?);
        }
        Commands::Drop { db } => {
            let path = cli.path.ok_or("Data directory required for drop")?;
            commands::drop::run(&path, &db)?;
            println!("dropped database {db}");
        }
        Commands::Version => {
            println!("Quarry CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
