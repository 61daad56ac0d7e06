//! Point operation commands.

use crate::commands::open;
use crate::error::{CliError, CliResult};
use kvdb_core::PutFlags;
use std::path::Path;

/// Runs the put command.
pub fn put(
    home: &Path,
    params: &[&str],
    kvs: &str,
    key: &str,
    value: &str,
    priority: bool,
) -> CliResult<()> {
    let db = open(home, params)?;
    let keyspace = db.open_keyspace(kvs, &[])?;
    let flags = if priority {
        PutFlags::PRIORITY
    } else {
        PutFlags::NONE
    };
    keyspace.put(None, key.as_bytes(), value.as_bytes(), flags)?;
    keyspace.close();
    db.close()?;
    Ok(())
}

/// Runs the get command.
pub fn get(home: &Path, params: &[&str], kvs: &str, key: &str) -> CliResult<()> {
    let db = open(home, params)?;
    let keyspace = db.open_keyspace(kvs, &[])?;
    let value = keyspace.get(None, key.as_bytes())?;
    match value {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        None => Err(CliError::KeyNotFound {
            kvs: kvs.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Runs the delete command.
pub fn delete(home: &Path, params: &[&str], kvs: &str, key: &str, prefix: bool) -> CliResult<()> {
    let db = open(home, params)?;
    let keyspace = db.open_keyspace(kvs, &[])?;
    if prefix {
        keyspace.prefix_delete(None, key.as_bytes())?;
    } else {
        keyspace.delete(None, key.as_bytes())?;
    }
    keyspace.close();
    db.close()?;
    Ok(())
}

/// Runs the sync command.
pub fn sync(home: &Path, params: &[&str]) -> CliResult<()> {
    let db = open(home, params)?;
    db.sync()?;
    db.close()?;
    Ok(())
}
