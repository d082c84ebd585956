//! storesync CLI
//!
//! Command-line tools for exercising and debugging storesync domains.
//!
//! # Commands
//!
//! - `simulate` - Run a scripted cart session and print its lifecycle events
//! - `inspect` - Decode a persisted snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storesync_storage::StorageScope;
use tracing_subscriber::EnvFilter;

/// storesync command-line tools.
#[derive(Parser)]
#[command(name = "storesync")]
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
    /// Run a scripted cart session against a mock remote
    Simulate {
        /// Number of cart operations to run
        #[arg(short, long, default_value = "8")]
        ops: usize,

        /// Fail every K-th remote call (0 never fails)
        #[arg(long, default_value = "3")]
        fail_every: usize,

        /// Persistence scope for the cart (local, session, memory, none)
        #[arg(short, long, default_value = "memory")]
        scope: StorageScope,

        /// Directory backing the local scope
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decode a snapshot persisted in the local scope
    Inspect {
        /// Directory backing the local scope
        #[arg(short, long)]
        dir: PathBuf,

        /// Persistence key; lists stored keys when omitted
        #[arg(short, long)]
        key: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            ops,
            fail_every,
            scope,
            dir,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                ops,
                fail_every,
                scope,
                dir,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Inspect { dir, key, format } => {
            commands::inspect::run(&dir, key.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("storesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
