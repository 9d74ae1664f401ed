//! rowsync CLI
//!
//! Command-line tools for on-disk sync batches and snapshots.
//!
//! # Commands
//!
//! - `inspect` - Display a batch summary, its parts and tables
//! - `verify` - Check that every part is present, decodes and fits the schema

mod commands;

use clap::{Parser, Subcommand};
use rowsync_codec::SerializationFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rowsync command-line batch tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display a batch summary
    Inspect {
        /// Batch or snapshot directory
        path: PathBuf,

        /// Show per-part table details
        #[arg(short, long)]
        parts: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify a batch directory
    Verify {
        /// Batch or snapshot directory
        path: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            path,
            parts,
            format,
        } => commands::inspect::run(&path, parts, &format)?,
        Commands::Verify { path } => commands::verify::run(&path)?,
        Commands::Version => {
            println!("rowsync CLI v{}", env!("CARGO_PKG_VERSION"));
            let formats: Vec<&str> = SerializationFormat::ALL.iter().map(|f| f.key()).collect();
            println!("Batch formats: {}", formats.join(", "));
        }
    }

    Ok(())
}
