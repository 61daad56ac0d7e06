//! Putbin command implementation.
//!
//! Splits `count` keys into one contiguous stride per thread; the last
//! thread also takes the remainder. Key `j` and its value are both the
//! base-2 text of `j`. Put throttling is disabled for the run.

use crate::commands::open;
use crate::error::{CliError, CliResult};
use kvdb_core::{Database, Keyspace, PutFlags};
use std::ops::Range;
use std::path::Path;
use std::thread;
use std::time::Instant;

/// Putbin settings.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Writer threads.
    pub threads: u64,
    /// Total keys.
    pub count: u64,
    /// Keys per transaction, 0 for standalone puts.
    pub batch: u64,
}

/// Runs the putbin command.
pub fn run(home: &Path, params: &[&str], kvs: &str, options: &Options) -> CliResult<()> {
    if options.threads == 0 {
        return Err(CliError::Usage("--threads must be at least 1".into()));
    }

    let mut params = params.to_vec();
    params.push("kvdb.throttle.disable=true");
    let db = open(home, &params)?;
    let keyspace = db.open_keyspace(kvs, &[])?;

    println!("putting {} keys across {} threads", options.count, options.threads);
    let started = Instant::now();

    thread::scope(|scope| {
        let workers: Vec<_> = stripes(options.count, options.threads)
            .map(|keys| {
                let db = &db;
                let keyspace = &keyspace;
                scope.spawn(move || load(db, keyspace, keys, options.batch))
            })
            .collect();
        workers
            .into_iter()
            .try_for_each(|w| w.join().map_err(|_| CliError::WorkerPanicked)?)
    })?;

    db.sync()?;
    let elapsed = started.elapsed().as_secs_f64();
    let rate = options.count as f64 / elapsed.max(f64::EPSILON);
    println!("done in {elapsed:.3}s ({rate:.0} puts/s)");

    keyspace.close();
    db.close()?;
    Ok(())
}

/// Key ranges handed to each thread.
fn stripes(count: u64, threads: u64) -> impl Iterator<Item = Range<u64>> {
    let stride = count / threads;
    (0..threads).map(move |i| {
        let start = i * stride;
        let end = if i == threads - 1 { count } else { start + stride };
        start..end
    })
}

fn load(db: &Database, keyspace: &Keyspace, keys: Range<u64>, batch: u64) -> CliResult<()> {
    let mut txn = if batch > 0 { Some(db.txn_alloc()?) } else { None };
    let (first, last) = (keys.start, keys.end);

    for j in keys {
        let key = format!("{j:b}");
        match txn.as_mut() {
            Some(txn) => {
                if (j - first) % batch == 0 {
                    txn.begin()?;
                }
                keyspace.put(Some(&*txn), key.as_bytes(), key.as_bytes(), PutFlags::NONE)?;
                if (j - first + 1) % batch == 0 || j + 1 == last {
                    txn.commit()?;
                }
            }
            None => keyspace.put(None, key.as_bytes(), key.as_bytes(), PutFlags::NONE)?,
        }
    }
    tracing::debug!(first, last, "putbin stripe done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripes_cover_every_key_once() {
        let ranges: Vec<_> = stripes(10, 3).collect();
        assert_eq!(ranges, [0..3, 3..6, 6..10]);

        let ranges: Vec<_> = stripes(2, 4).collect();
        assert_eq!(ranges, [0..0, 0..0, 0..0, 0..2]);
    }
}
