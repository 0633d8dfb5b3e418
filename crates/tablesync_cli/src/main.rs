//! TableSync CLI
//!
//! Command-line tools for running and inspecting table sync.
//!
//! # Commands
//!
//! - `classify` - Classify a JSON record dump against a watermark
//! - `sync` - Sync a local snapshot with a directory-backed remote
//! - `status` - Show the watermark and outstanding changes of a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TableSync command-line tools.
#[derive(Parser)]
#[command(name = "tablesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store snapshot
    #[arg(global = true, short, long)]
    local: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify records against a watermark
    Classify {
        /// JSON file holding an array of records
        #[arg(short, long)]
        input: PathBuf,

        /// Last pulled timestamp in Unix seconds
        #[arg(short, long)]
        watermark: Option<i64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync a local snapshot with a remote directory
    Sync {
        /// Directory holding one <table>.json per remote table
        #[arg(short, long)]
        remote: PathBuf,

        /// Table to sync, as `name` or `name:referenced,...`, in push order
        #[arg(short, long = "table", required = true)]
        tables: Vec<String>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Local schema version
        #[arg(long, default_value = "1")]
        schema_version: u32,

        /// Run one cycle and exit instead of syncing on an interval
        #[arg(long)]
        once: bool,
    },

    /// Show snapshot status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Classify {
            input,
            watermark,
            format,
        } => {
            commands::classify::run(&input, watermark, &format)?;
        }
        Commands::Sync {
            remote,
            tables,
            config,
            schema_version,
            once,
        } => {
            let local = cli.local.ok_or("Local snapshot path required for sync")?;
            let options = commands::sync::SyncOptions {
                remote,
                local,
                tables,
                config,
                schema_version,
                once,
            };
            commands::sync::run(&options)?;
        }
        Commands::Status { format } => {
            let local = cli.local.ok_or("Local snapshot path required for status")?;
            commands::status::run(&local, &format)?;
        }
        Commands::Version => {
            println!("TableSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
