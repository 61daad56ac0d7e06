//! kvdb CLI
//!
//! Command-line tools for kvdb databases.
//!
//! # Commands
//!
//! - `create` - Create a database
//! - `kvs-create` / `kvs-drop` / `kvs-list` - Manage keyspaces
//! - `put` / `get` / `delete` - Point operations
//! - `scan` - Iterate a keyspace
//! - `putbin` - Multi-threaded bulk load
//! - `compact` / `sync` - Maintenance

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// kvdb command-line database tools.
#[derive(Parser)]
#[command(name = "kvdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database home directory
    #[arg(global = true, short = 'C', long)]
    home: Option<PathBuf>,

    /// Database parameter as key=value (repeatable)
    #[arg(global = true, short = 'p', long = "param")]
    params: Vec<String>,

    /// JSON file with runtime parameter defaults
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a database
    Create,

    /// Create a keyspace
    KvsCreate {
        /// Keyspace name
        name: String,

        /// Keyspace parameter as key=value, e.g. prefix.length=4
        #[arg(short = 'k', long = "kvs-param")]
        kvs_params: Vec<String>,
    },

    /// Drop a keyspace and its data
    KvsDrop {
        /// Keyspace name
        name: String,
    },

    /// List keyspaces
    KvsList {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Store a value
    Put {
        /// Keyspace name
        kvs: String,
        /// Key
        key: String,
        /// Value
        value: String,
        /// Bypass put throttling
        #[arg(long)]
        priority: bool,
    },

    /// Print a value
    Get {
        /// Keyspace name
        kvs: String,
        /// Key
        key: String,
    },

    /// Delete a key, or every key with a prefix
    Delete {
        /// Keyspace name
        kvs: String,
        /// Key, or prefix with --prefix
        key: String,
        /// Treat the key as a prefix
        #[arg(long)]
        prefix: bool,
    },

    /// Iterate a keyspace in key order
    Scan {
        /// Keyspace name
        kvs: String,
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Descending order
        #[arg(short, long)]
        reverse: bool,
        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Bulk-load base-2 text keys from several threads
    Putbin {
        /// Keyspace name
        kvs: String,
        /// Number of writer threads
        #[arg(short, long, default_value = "1")]
        threads: u64,
        /// Total keys, split across the threads
        #[arg(short = 'c', long, default_value = "1000000")]
        count: u64,
        /// Keys committed per transaction, 0 for one put per key
        #[arg(long, default_value = "0")]
        batch: u64,
    },

    /// Start, cancel or poll compaction
    Compact {
        /// Compact regardless of space amplification
        #[arg(long, conflicts_with = "cancel")]
        full: bool,
        /// Cancel a running compaction
        #[arg(long)]
        cancel: bool,
        /// Wait for compaction to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Flush committed data to stable storage
    Sync,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("kvdb CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("kvdb core v{}", kvdb_core::VERSION);
        return Ok(());
    }

    let _runtime = kvdb_core::Runtime::init(cli.config.as_deref(), &[])?;
    let home = cli.home.ok_or(error::CliError::HomeRequired)?;
    let params: Vec<&str> = cli.params.iter().map(String::as_str).collect();

    match cli.command {
        Commands::Create => commands::keyspace::create_db(&home, &params)?,
        Commands::KvsCreate { name, kvs_params } => {
            let kvs_params: Vec<&str> = kvs_params.iter().map(String::as_str).collect();
            commands::keyspace::create(&home, &params, &name, &kvs_params)?;
        }
        Commands::KvsDrop { name } => commands::keyspace::drop(&home, &params, &name)?,
        Commands::KvsList { format } => commands::keyspace::list(&home, &params, &format)?,
        Commands::Put {
            kvs,
            key,
            value,
            priority,
        } => commands::data::put(&home, &params, &kvs, &key, &value, priority)?,
        Commands::Get { kvs, key } => commands::data::get(&home, &params, &kvs, &key)?,
        Commands::Delete { kvs, key, prefix } => {
            commands::data::delete(&home, &params, &kvs, &key, prefix)?;
        }
        Commands::Scan {
            kvs,
            prefix,
            reverse,
            limit,
            format,
        } => commands::scan::run(
            &home,
            &params,
            &kvs,
            prefix.as_deref(),
            reverse,
            limit,
            &format,
        )?,
        Commands::Putbin {
            kvs,
            threads,
            count,
            batch,
        } => commands::putbin::run(
            &home,
            &params,
            &kvs,
            &commands::putbin::Options {
                threads,
                count,
                batch,
            },
        )?,
        Commands::Compact { full, cancel, wait } => {
            commands::compact::run(&home, &params, full, cancel, wait)?;
        }
        Commands::Sync => commands::data::sync(&home, &params)?,
        Commands::Version => {}
    }

    Ok(())
}
