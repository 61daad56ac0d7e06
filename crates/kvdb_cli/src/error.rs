//! CLI error type.

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No `--home` was given.
    #[error("database home required (--home)")]
    HomeRequired,

    /// A key was not found.
    #[error("key {key:?} not found in keyspace {kvs:?}")]
    KeyNotFound {
        /// Keyspace name.
        kvs: String,
        /// Requested key.
        key: String,
    },

    /// Invalid command-line argument.
    #[error("{0}")]
    Usage(String),

    /// Engine error.
    #[error(transparent)]
    Kvdb(#[from] kvdb_core::KvdbError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
