//! Database and keyspace administration commands.

use crate::commands::open;
use crate::error::{CliError, CliResult};
use kvdb_core::Database;
use serde::Serialize;
use std::path::Path;

/// Keyspace listing entry.
#[derive(Debug, Serialize)]
pub struct KeyspaceInfo {
    /// Keyspace name.
    pub name: String,
    /// Configured prefix length.
    pub prefix_length: usize,
}

/// Runs the create command.
pub fn create_db(home: &Path, params: &[&str]) -> CliResult<()> {
    let db = Database::create(home, params)?;
    db.close()?;
    println!("Created database at {}", home.display());
    Ok(())
}

/// Runs the kvs-create command.
pub fn create(home: &Path, params: &[&str], name: &str, kvs_params: &[&str]) -> CliResult<()> {
    let db = open(home, params)?;
    db.create_keyspace(name, kvs_params)?;
    db.close()?;
    println!("Created keyspace {name}");
    Ok(())
}

/// Runs the kvs-drop command.
pub fn drop(home: &Path, params: &[&str], name: &str) -> CliResult<()> {
    let db = open(home, params)?;
    db.drop_keyspace(name)?;
    db.close()?;
    println!("Dropped keyspace {name}");
    Ok(())
}

/// Runs the kvs-list command.
pub fn list(home: &Path, params: &[&str], format: &str) -> CliResult<()> {
    let db = open(home, params)?;
    let mut infos = Vec::new();
    for name in db.keyspace_names()? {
        let kvs = db.open_keyspace(&name, &[])?;
        infos.push(KeyspaceInfo {
            prefix_length: kvs.prefix_len(),
            name,
        });
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&infos)?),
        "text" => {
            if infos.is_empty() {
                println!("No keyspaces");
            }
            for info in &infos {
                println!("{:<32}  prefix.length={}", info.name, info.prefix_length);
            }
        }
        other => return Err(CliError::Usage(format!("unknown format {other:?}"))),
    }
    Ok(())
}
