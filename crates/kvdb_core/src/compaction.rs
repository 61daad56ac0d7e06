//! Background compaction.
//!
//! A compaction pass first drops version history that no live snapshot can
//! observe, then rewrites the data log to hold only the latest committed
//! state. Space amplification (data log size over live state size) is
//! sampled on demand by [`Database::compact_status`](crate::Database::compact_status).

use crate::database::DbShared;
use crate::error::KvdbResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// What [`Database::compact`](crate::Database::compact) should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactRequest {
    /// Compact unconditionally.
    Full,
    /// Compact only if space amplification is above the low watermark.
    ToLowWatermark,
    /// Cancel a running compaction.
    Cancel,
}

/// A sample of compaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactStatus {
    /// Space amplification low watermark, in percent.
    pub samp_lwm_pct: u32,
    /// Space amplification high watermark, in percent.
    pub samp_hwm_pct: u32,
    /// Current space amplification, in percent.
    pub samp_curr_pct: u32,
    /// Whether a compaction is running.
    pub active: bool,
    /// Whether the last compaction was canceled.
    pub canceled: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CompactionControl {
    active: AtomicBool,
    cancel: AtomicBool,
    canceled: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionControl {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn was_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Handles a compaction request. Starting while a pass is active does
/// nothing.
pub(crate) fn request(db: &Arc<DbShared>, request: CompactRequest) -> KvdbResult<()> {
    let control = &db.compaction;
    if request == CompactRequest::Cancel {
        if control.is_active() {
            control.cancel.store(true, Ordering::Release);
            tracing::info!("compaction cancel requested");
        }
        return Ok(());
    }

    let mut worker = control.worker.lock();
    if control.is_active() {
        tracing::debug!(?request, "compaction already active");
        return Ok(());
    }
    if request == CompactRequest::ToLowWatermark {
        let curr = db.space_amp_pct()?;
        if curr <= db.config.lwm_pct {
            tracing::debug!(curr, lwm = db.config.lwm_pct, "below low watermark, not compacting");
            return Ok(());
        }
    }
    if let Some(finished) = worker.take() {
        if finished.join().is_err() {
            tracing::error!("previous compaction worker panicked");
        }
    }

    control.cancel.store(false, Ordering::Release);
    control.canceled.store(false, Ordering::Release);
    control.active.store(true, Ordering::Release);

    let shared = Arc::clone(db);
    let spawned = thread::Builder::new()
        .name("kvdb-compact".into())
        .spawn(move || run(&shared));
    match spawned {
        Ok(handle) => {
            *worker = Some(handle);
            Ok(())
        }
        Err(e) => {
            control.active.store(false, Ordering::Release);
            Err(e.into())
        }
    }
}

/// Cancels a running pass and waits for the worker to exit.
pub(crate) fn stop(db: &DbShared) {
    let control = &db.compaction;
    if control.is_active() {
        control.cancel.store(true, Ordering::Release);
    }
    let handle = control.worker.lock().take();
    if let Some(handle) = handle {
        if handle.join().is_err() {
            tracing::error!("compaction worker panicked");
        }
    }
}

fn run(db: &DbShared) {
    let control = &db.compaction;
    let started = Instant::now();
    tracing::info!("compaction started");

    match compact(db) {
        Ok(Some((before, after))) => {
            tracing::info!(
                log_before = before,
                log_after = after,
                elapsed = ?started.elapsed(),
                "compaction finished"
            );
        }
        Ok(None) => {
            control.canceled.store(true, Ordering::Release);
            tracing::info!(elapsed = ?started.elapsed(), "compaction canceled");
        }
        Err(e) => {
            tracing::error!(error = %e, "compaction failed");
        }
    }

    control.cancel.store(false, Ordering::Release);
    control.active.store(false, Ordering::Release);
}

/// Returns the log size before and after, or `None` if canceled.
fn compact(db: &DbShared) -> KvdbResult<Option<(u64, u64)>> {
    let control = &db.compaction;
    let horizon = db.registry.horizon();

    for store in db.stores() {
        if control.cancel_requested() || db.is_closed() {
            return Ok(None);
        }
        let stats = store.gc(horizon);
        tracing::debug!(
            kvs = %store.id(),
            %horizon,
            versions = stats.versions_removed,
            tombstones = stats.tombstones_removed,
            "keyspace history collected"
        );
    }

    if control.cancel_requested() || db.is_closed() {
        return Ok(None);
    }
    db.rewrite_log().map(Some)
}
