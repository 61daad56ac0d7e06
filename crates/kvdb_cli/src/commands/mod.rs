//! CLI command implementations.

pub mod compact;
pub mod data;
pub mod keyspace;
pub mod putbin;
pub mod scan;

use crate::error::CliResult;
use kvdb_core::Database;
use std::path::Path;

/// Opens the database at `home` with the command-line parameters.
pub fn open(home: &Path, params: &[&str]) -> CliResult<Database> {
    tracing::debug!(home = %home.display(), ?params, "opening database");
    Ok(Database::open(home, params)?)
}
