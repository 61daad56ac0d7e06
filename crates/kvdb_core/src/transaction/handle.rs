//! Transaction handle.

use crate::database::DbShared;
use crate::error::{KvdbError, KvdbResult};
use crate::store::Snapshot;
use crate::transaction::state::{PendingWrites, TransactionState};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};

/// A reusable transaction.
///
/// Obtained from [`Database::txn_alloc`](crate::Database::txn_alloc).
/// Lifecycle methods take `&mut self`; keyspace operations borrow the
/// transaction shared, so one transaction can feed several keyspaces and
/// cursors at once.
///
/// Dropping the handle frees it, aborting an active cycle first.
#[derive(Debug)]
pub struct Transaction {
    core: Arc<TxnCore>,
}

/// State shared between a transaction handle and the cursors bound to it.
#[derive(Debug)]
pub(crate) struct TxnCore {
    id: TransactionId,
    pub(crate) db: Arc<DbShared>,
    inner: Mutex<TxnInner>,
}

#[derive(Debug)]
pub(crate) struct TxnInner {
    pub(crate) state: TransactionState,
    /// Bumped on every `begin`, so a cursor can tell whether the cycle it was
    /// bound in is still running.
    pub(crate) generation: u64,
    pub(crate) snapshot: Option<Snapshot>,
    pub(crate) writes: PendingWrites,
    bound: Vec<Weak<BoundSlot>>,
    freed: bool,
}

/// Where a transaction leaves the view a bound cursor reverts to when the
/// cycle ends.
#[derive(Debug)]
pub(crate) struct BoundSlot {
    static_view: bool,
    reverted: Mutex<Option<Snapshot>>,
}

impl BoundSlot {
    pub(crate) fn take(&self) -> Option<Snapshot> {
        self.reverted.lock().take()
    }
}

impl TxnInner {
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.state == TransactionState::Active && self.generation == generation
    }

    pub(crate) fn snapshot_seq(&self) -> KvdbResult<SequenceNumber> {
        self.snapshot
            .as_ref()
            .map(Snapshot::seq)
            .ok_or_else(not_active)
    }

    /// Ends the current cycle, handing each bound cursor its fallback view.
    fn finish(&mut self, db: &DbShared, state: TransactionState) {
        for slot in self.bound.drain(..).filter_map(|w| w.upgrade()) {
            let view = match (&self.snapshot, slot.static_view) {
                (Some(snapshot), true) => snapshot.clone(),
                _ => db.registry.acquire_latest(),
            };
            *slot.reverted.lock() = Some(view);
        }
        self.writes.clear();
        self.snapshot = None;
        self.state = state;
    }
}

impl TxnCore {
    /// Locks the transaction and checks it is active.
    pub(crate) fn active(&self) -> KvdbResult<MutexGuard<'_, TxnInner>> {
        self.db.ensure_open()?;
        let inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(not_active());
        }
        Ok(inner)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TxnInner> {
        self.inner.lock()
    }

    /// Snapshot and generation for a cursor reading the transaction's view.
    pub(crate) fn view(&self) -> KvdbResult<(Snapshot, u64)> {
        let inner = self.active()?;
        let snapshot = inner.snapshot.clone().ok_or_else(not_active)?;
        Ok((snapshot, inner.generation))
    }

    /// Registers a bound cursor for the current cycle.
    pub(crate) fn bind(&self, static_view: bool) -> KvdbResult<(Snapshot, u64, Arc<BoundSlot>)> {
        let mut inner = self.active()?;
        let snapshot = inner.snapshot.clone().ok_or_else(not_active)?;
        let slot = Arc::new(BoundSlot {
            static_view,
            reverted: Mutex::new(None),
        });
        inner.bound.retain(|w| w.strong_count() > 0);
        inner.bound.push(Arc::downgrade(&slot));
        Ok((snapshot, inner.generation, slot))
    }
}

impl Transaction {
    pub(crate) fn new(db: Arc<DbShared>, id: TransactionId) -> Self {
        Self {
            core: Arc::new(TxnCore {
                id,
                db,
                inner: Mutex::new(TxnInner {
                    state: TransactionState::Invalid,
                    generation: 0,
                    snapshot: None,
                    writes: PendingWrites::default(),
                    bound: Vec::new(),
                    freed: false,
                }),
            }),
        }
    }

    pub(crate) fn core(&self) -> &Arc<TxnCore> {
        &self.core
    }

    /// Transaction id, unique within its database.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.core.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.core.inner.lock().state
    }

    /// Starts a cycle with a snapshot of the latest committed state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the transaction is already active or has
    /// been freed, or the database is closed.
    pub fn begin(&mut self) -> KvdbResult<()> {
        self.core.db.ensure_open()?;
        let mut inner = self.core.inner.lock();
        if inner.freed {
            return Err(KvdbError::invalid_state("transaction has been freed"));
        }
        if inner.state == TransactionState::Active {
            return Err(KvdbError::invalid_state("transaction is already active"));
        }

        inner.generation += 1;
        inner.snapshot = Some(self.core.db.registry.acquire_latest());
        inner.writes.clear();
        inner.bound.clear();
        inner.state = TransactionState::Active;
        tracing::trace!(txn = %self.core.id, generation = inner.generation, "transaction begun");
        Ok(())
    }

    /// Publishes every buffered write atomically.
    ///
    /// On failure the cycle ends aborted and nothing is published.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the transaction is active, or the data
    /// log error that prevented the commit.
    pub fn commit(&mut self) -> KvdbResult<()> {
        let db = &self.core.db;
        let mut inner = self.core.active()?;

        let write_count = inner.writes.len();
        let ops = inner.writes.take_ops();
        match db.commit(ops) {
            Ok(seq) => {
                inner.finish(db, TransactionState::Committed);
                tracing::trace!(txn = %self.core.id, %seq, write_count, "transaction committed");
                Ok(())
            }
            Err(e) => {
                inner.finish(db, TransactionState::Aborted);
                Err(e)
            }
        }
    }

    /// Discards every buffered write.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the transaction is active.
    pub fn abort(&mut self) -> KvdbResult<()> {
        let mut inner = self.core.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(not_active());
        }
        inner.finish(&self.core.db, TransactionState::Aborted);
        tracing::trace!(txn = %self.core.id, "transaction aborted");
        Ok(())
    }

    /// Releases the transaction, aborting an active cycle first.
    ///
    /// Calling it again, or dropping the handle afterwards, does nothing.
    pub fn free(&mut self) {
        let mut inner = self.core.inner.lock();
        if inner.freed {
            return;
        }
        if inner.state == TransactionState::Active {
            inner.finish(&self.core.db, TransactionState::Aborted);
        }
        inner.freed = true;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.free();
    }
}

fn not_active() -> KvdbError {
    KvdbError::invalid_state("transaction is not active")
}
