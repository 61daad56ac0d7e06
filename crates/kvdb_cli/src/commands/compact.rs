//! Compact command implementation.

use crate::commands::open;
use crate::error::CliResult;
use kvdb_core::{CompactRequest, CompactStatus, Database};
use std::path::Path;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the compact command and prints the resulting status as JSON.
///
/// Without `wait` the database is closed right away, which cancels a
/// compaction still running; so a request without `--wait` is mostly useful
/// to sample status.
pub fn run(home: &Path, params: &[&str], full: bool, cancel: bool, wait: bool) -> CliResult<()> {
    let db = open(home, params)?;
    let request = if cancel {
        CompactRequest::Cancel
    } else if full {
        CompactRequest::Full
    } else {
        CompactRequest::ToLowWatermark
    };

    let before = db.compact_status()?;
    tracing::info!(?request, curr = before.samp_curr_pct, "requesting compaction");
    db.compact(request)?;

    let status = if wait {
        wait_idle(&db)?
    } else {
        db.compact_status()?
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    db.close()?;
    Ok(())
}

fn wait_idle(db: &Database) -> CliResult<CompactStatus> {
    loop {
        let status = db.compact_status()?;
        if !status.active {
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
