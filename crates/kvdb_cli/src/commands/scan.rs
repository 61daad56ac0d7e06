//! Scan command implementation.

use crate::commands::open;
use crate::error::{CliError, CliResult};
use kvdb_core::{CursorBinding, CursorFlags};
use serde::Serialize;
use std::path::Path;

/// Entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Key, lossily decoded as UTF-8.
    pub key: String,
    /// Value, lossily decoded as UTF-8.
    pub value: String,
    /// Value length in bytes.
    pub value_len: usize,
}

/// Runs the scan command.
pub fn run(
    home: &Path,
    params: &[&str],
    kvs: &str,
    prefix: Option<&str>,
    reverse: bool,
    limit: Option<usize>,
    format: &str,
) -> CliResult<()> {
    if !matches!(format, "text" | "json") {
        return Err(CliError::Usage(format!("unknown format {format:?}")));
    }

    let db = open(home, params)?;
    let keyspace = db.open_keyspace(kvs, &[])?;
    let flags = if reverse {
        CursorFlags::REVERSE
    } else {
        CursorFlags::NONE
    };
    let mut cursor = keyspace.cursor(prefix.map(str::as_bytes), flags, CursorBinding::Free)?;

    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    while entries.len() < max_entries {
        let Some((key, value)) = cursor.read()? else {
            break;
        };
        entries.push(EntryInfo {
            key: String::from_utf8_lossy(&key).into_owned(),
            value: String::from_utf8_lossy(&value).into_owned(),
            value_len: value.len(),
        });
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}\t{}", entry.key, entry.value);
        }
        println!("({} entries)", entries.len());
    }
    Ok(())
}
