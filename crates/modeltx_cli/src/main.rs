//! modeltx CLI
//!
//! Command-line tools for exercising a modeltx editing domain.
//!
//! # Commands
//!
//! - `demo` - Run end-to-end scenarios and report the outcome
//! - `stress` - Run concurrent readers and writers and report throughput
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use tracing_subscriber::EnvFilter;

/// modeltx command-line tools.
#[derive(Parser)]
#[command(name = "modeltx")]
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
    /// Run end-to-end scenarios against a fresh domain
    Demo {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Run concurrent readers and writers against one domain
    Stress {
        /// Total number of operations
        #[arg(short, long, default_value = "10000")]
        operations: usize,

        /// Number of reader threads
        #[arg(short, long, default_value = "4")]
        readers: usize,

        /// Number of writer threads
        #[arg(short, long, default_value = "2")]
        writers: usize,

        /// Number of entities written to
        #[arg(short, long, default_value = "100")]
        entities: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
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
        Commands::Demo { format } => commands::demo::run(format)?,
        Commands::Stress {
            operations,
            readers,
            writers,
            entities,
            format,
        } => commands::stress::run(operations, readers, writers, entities, format)?,
        Commands::Version => {
            println!("modeltx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("modeltx Core v{}", modeltx_core::VERSION);
        }
    }

    Ok(())
}
