//! Ordered cursors over one keyspace.
//!
//! A cursor reads a frozen view of its keyspace. What that view is depends
//! on how the cursor is bound:
//!
//! - [`CursorBinding::Free`]: the latest committed state when the cursor
//!   was created or last refreshed.
//! - [`CursorBinding::Snapshot`]: the transaction's snapshot, without the
//!   transaction's own writes.
//! - [`CursorBinding::Bound`]: the transaction's snapshot plus its writes,
//!   live. When the transaction commits or aborts the cursor becomes free;
//!   with [`CursorFlags::STATIC_VIEW`] it keeps the transaction snapshot,
//!   otherwise it moves to the state right after the commit or abort.
//!
//! Exhaustion is sticky: once [`Cursor::read`] returns `None` it keeps
//! doing so until a seek or a view update.

use crate::database::DbShared;
use crate::error::{KvdbError, KvdbResult};
use crate::keyspace::KvsHandle;
use crate::limits::check_key;
use crate::store::{KeyspaceStore, Snapshot};
use crate::transaction::{BoundSlot, Transaction, TxnCore};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

/// Flags fixed when a cursor is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorFlags(u8);

impl CursorFlags {
    /// Forward iteration, dynamic view.
    pub const NONE: Self = Self(0);
    /// Iterate in descending key order.
    pub const REVERSE: Self = Self(1);
    /// A bound cursor keeps its transaction's snapshot after the
    /// transaction ends.
    pub const STATIC_VIEW: Self = Self(2);

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CursorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How a cursor relates to a transaction.
#[derive(Debug, Clone, Copy)]
pub enum CursorBinding<'a> {
    /// No transaction.
    Free,
    /// The transaction's snapshot, never its writes.
    Snapshot(&'a Transaction),
    /// The transaction's snapshot and its uncommitted writes.
    Bound(&'a Transaction),
}

impl<'a> CursorBinding<'a> {
    pub(crate) fn transaction(&self) -> Option<&'a Transaction> {
        match *self {
            Self::Free => None,
            Self::Snapshot(txn) | Self::Bound(txn) => Some(txn),
        }
    }
}

#[derive(Debug)]
enum View {
    Free {
        snapshot: Snapshot,
    },
    Snapshot {
        snapshot: Snapshot,
        txn: Arc<TxnCore>,
        generation: u64,
    },
    Bound {
        snapshot: Snapshot,
        txn: Arc<TxnCore>,
        generation: u64,
        slot: Arc<BoundSlot>,
    },
}

impl View {
    fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Free { snapshot }
            | Self::Snapshot { snapshot, .. }
            | Self::Bound { snapshot, .. } => snapshot,
        }
    }
}

/// An ordered cursor over one keyspace.
///
/// Created by [`Keyspace::cursor`](crate::Keyspace::cursor). Holds the
/// keyspace open until destroyed or dropped.
#[derive(Debug)]
pub struct Cursor {
    db: Arc<DbShared>,
    /// Released by `destroy`.
    handle: Option<Arc<KvsHandle>>,
    store: Arc<KeyspaceStore>,
    filter: Vec<u8>,
    filter_end: Option<Vec<u8>>,
    reverse: bool,
    static_view: bool,
    /// `None` once destroyed.
    view: Option<View>,
    /// Boundary of what has been consumed, in scan direction.
    position: Bound<Vec<u8>>,
    range_min: Option<Vec<u8>>,
    range_max: Option<Vec<u8>>,
    exhausted: bool,
}

impl Cursor {
    pub(crate) fn new(
        handle: Arc<KvsHandle>,
        store: Arc<KeyspaceStore>,
        filter: Vec<u8>,
        flags: CursorFlags,
        binding: CursorBinding<'_>,
    ) -> KvdbResult<Self> {
        let static_view = flags.contains(CursorFlags::STATIC_VIEW);
        let db = Arc::clone(handle.db());
        let view = make_view(&db, binding, static_view)?;
        let filter_end = prefix_successor(&filter);
        Ok(Self {
            db,
            handle: Some(handle),
            store,
            filter,
            filter_end,
            reverse: flags.contains(CursorFlags::REVERSE),
            static_view,
            view: Some(view),
            position: Bound::Unbounded,
            range_min: None,
            range_max: None,
            exhausted: false,
        })
    }

    /// Whether the cursor iterates in descending order.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Whether the last read found nothing.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns the next entry, or `None` once the view is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `StaleView` if a filtered free cursor overlaps a prefix
    /// delete committed after its view was taken, and `InvalidState` after
    /// destroy or database close.
    pub fn read(&mut self) -> KvdbResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_usable()?;
        if self.exhausted {
            return Ok(None);
        }
        self.check_stale()?;

        let position = self.position.as_ref().map(Vec::as_slice);
        match self.peek(position)? {
            Some((key, value)) => {
                self.position = Bound::Excluded(key.clone());
                Ok(Some((key, value)))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Positions the cursor at the first key at or after `key` in scan
    /// direction and returns it, without consuming it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad key, `InvalidState` after destroy.
    pub fn seek(&mut self, key: &[u8]) -> KvdbResult<Option<Vec<u8>>> {
        self.check_usable()?;
        check_key(key)?;
        self.check_stale()?;
        self.position_at(Bound::Included(key))
    }

    /// Restricts iteration to `[min, max]` and positions the cursor at the
    /// start of the range in scan direction, returning that key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad key or `min > max`.
    pub fn seek_range(&mut self, min: &[u8], max: &[u8]) -> KvdbResult<Option<Vec<u8>>> {
        self.check_usable()?;
        check_key(min)?;
        check_key(max)?;
        if min > max {
            return Err(KvdbError::invalid_argument("seek range minimum exceeds maximum"));
        }
        self.check_stale()?;
        self.range_min = Some(min.to_vec());
        self.range_max = Some(max.to_vec());
        self.position_at(Bound::Unbounded)
    }

    /// Refreshes the view, keeping the position.
    ///
    /// A free cursor moves to the latest committed state. A snapshot cursor
    /// whose transaction is still active, or a bound cursor whose
    /// transaction is still active, is left alone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after destroy or database close.
    pub fn update_view(&mut self) -> KvdbResult<()> {
        self.check_usable()?;
        let refresh = match self.view.as_ref() {
            Some(View::Free { .. }) | None => true,
            Some(View::Snapshot { txn, generation, .. } | View::Bound { txn, generation, .. }) => {
                !txn.lock().is_current(*generation)
            }
        };
        if refresh {
            let snapshot = self.db.registry.acquire_latest();
            self.view = Some(View::Free { snapshot });
        }
        self.exhausted = false;
        Ok(())
    }

    /// Refreshes the view under a new binding, keeping the position and
    /// direction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a transaction of another database and
    /// `InvalidState` for an inactive one.
    pub fn update_view_with(&mut self, binding: CursorBinding<'_>) -> KvdbResult<()> {
        self.check_usable()?;
        if let Some(txn) = binding.transaction() {
            if !Arc::ptr_eq(&txn.core().db, &self.db) {
                return Err(KvdbError::invalid_argument(
                    "transaction belongs to another database",
                ));
            }
        }

        let unchanged = match (&binding, self.view.as_ref()) {
            (CursorBinding::Bound(txn), Some(View::Bound { txn: core, generation, .. })) => {
                Arc::ptr_eq(txn.core(), core) && core.lock().is_current(*generation)
            }
            _ => false,
        };
        if !unchanged {
            self.view = Some(make_view(&self.db, binding, self.static_view)?);
        }
        self.exhausted = false;
        Ok(())
    }

    /// Releases the cursor. Calling it again does nothing.
    pub fn destroy(&mut self) {
        self.view = None;
        self.handle = None;
    }

    fn check_usable(&mut self) -> KvdbResult<()> {
        self.db.ensure_open()?;
        if self.view.is_none() {
            return Err(KvdbError::invalid_state("cursor has been destroyed"));
        }
        self.sync_binding();
        Ok(())
    }

    /// Reverts a bound cursor whose transaction has ended.
    fn sync_binding(&mut self) {
        let reverted = match self.view.as_ref() {
            Some(View::Bound { slot, .. }) => slot.take(),
            _ => None,
        };
        if let Some(snapshot) = reverted {
            tracing::trace!(kvs = ?self.store.id(), seq = %snapshot.seq(), "bound cursor reverted to free");
            self.view = Some(View::Free { snapshot });
        }
    }

    fn check_stale(&self) -> KvdbResult<()> {
        if self.filter.is_empty() {
            return Ok(());
        }
        if let Some(View::Free { snapshot }) = self.view.as_ref() {
            if self.store.prefix_deleted_since(snapshot.seq(), &self.filter) {
                return Err(KvdbError::StaleView);
            }
        }
        Ok(())
    }

    fn position_at(&mut self, from: Bound<&[u8]>) -> KvdbResult<Option<Vec<u8>>> {
        match self.peek(from)? {
            Some((key, _)) => {
                self.position = Bound::Included(key.clone());
                self.exhausted = false;
                Ok(Some(key))
            }
            None => {
                self.position = from.map(<[u8]>::to_vec);
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// First visible entry past `from` in scan direction.
    fn peek(&self, from: Bound<&[u8]>) -> KvdbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let (lower, upper) = self.bounds(from);
        let view = self
            .view
            .as_ref()
            .ok_or_else(|| KvdbError::invalid_state("cursor has been destroyed"))?;
        let seq = view.snapshot().seq();

        let View::Bound { txn, generation, .. } = view else {
            return Ok(self.store.next_visible(lower, upper, self.reverse, seq, |_| false));
        };

        let inner = txn.lock();
        if !inner.is_current(*generation) {
            // ended between sync_binding and here, read the frozen snapshot
            return Ok(self.store.next_visible(lower, upper, self.reverse, seq, |_| false));
        }
        let Some(writes) = inner.writes.kvs(self.store.id()) else {
            return Ok(self.store.next_visible(lower, upper, self.reverse, seq, |_| false));
        };

        let committed = self
            .store
            .next_visible(lower, upper, self.reverse, seq, |k| writes.masks(k));
        let pending = writes
            .next_put(lower, upper, self.reverse)
            .map(|(k, v)| (k.to_vec(), v.to_vec()));
        Ok(match (committed, pending) {
            (Some(c), Some(p)) => {
                let committed_first = match c.0.cmp(&p.0) {
                    Ordering::Less => !self.reverse,
                    Ordering::Greater => self.reverse,
                    Ordering::Equal => false,
                };
                Some(if committed_first { c } else { p })
            }
            (c, p) => c.or(p),
        })
    }

    /// Key range left to scan, starting from `from` in scan direction.
    fn bounds<'s>(&'s self, from: Bound<&'s [u8]>) -> (Bound<&'s [u8]>, Bound<&'s [u8]>) {
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;
        if !self.filter.is_empty() {
            lower = Bound::Included(self.filter.as_slice());
            upper = self
                .filter_end
                .as_deref()
                .map_or(Bound::Unbounded, Bound::Excluded);
        }
        if let Some(min) = &self.range_min {
            lower = tighter_lower(lower, Bound::Included(min.as_slice()));
        }
        if let Some(max) = &self.range_max {
            upper = tighter_upper(upper, Bound::Included(max.as_slice()));
        }
        if self.reverse {
            upper = tighter_upper(upper, from);
        } else {
            lower = tighter_lower(lower, from);
        }
        (lower, upper)
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn make_view(db: &DbShared, binding: CursorBinding<'_>, static_view: bool) -> KvdbResult<View> {
    Ok(match binding {
        CursorBinding::Free => View::Free {
            snapshot: db.registry.acquire_latest(),
        },
        CursorBinding::Snapshot(txn) => {
            let (snapshot, generation) = txn.core().view()?;
            View::Snapshot {
                snapshot,
                txn: Arc::clone(txn.core()),
                generation,
            }
        }
        CursorBinding::Bound(txn) => {
            let (snapshot, generation, slot) = txn.core().bind(static_view)?;
            View::Bound {
                snapshot,
                txn: Arc::clone(txn.core()),
                generation,
                slot,
            }
        }
    })
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn tighter_lower<'k>(a: Bound<&'k [u8]>, b: Bound<&'k [u8]>) -> Bound<&'k [u8]> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y)),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i > e {
                Bound::Included(i)
            } else {
                Bound::Excluded(e)
            }
        }
    }
}

fn tighter_upper<'k>(a: Bound<&'k [u8]>, b: Bound<&'k [u8]>) -> Bound<&'k [u8]> {
    match (a, b) {
        (Bound::Unbounded, x) | (x, Bound::Unbounded) => x,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y)),
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if i < e {
                Bound::Included(i)
            } else {
                Bound::Excluded(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_successor_skips_trailing_max_bytes() {
        assert_eq!(prefix_successor(b"key"), Some(b"kez".to_vec()));
        assert_eq!(prefix_successor(&[b'a', 0xff, 0xff]), Some(vec![b'b']));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn tighter_bounds_prefer_exclusion_on_ties() {
        let a: &[u8] = b"a";
        let b: &[u8] = b"b";
        assert_eq!(
            tighter_lower(Bound::Included(a), Bound::Excluded(a)),
            Bound::Excluded(a)
        );
        assert_eq!(tighter_lower(Bound::Included(b), Bound::Excluded(a)), Bound::Included(b));
        assert_eq!(tighter_upper(Bound::Included(b), Bound::Excluded(b)), Bound::Excluded(b));
        assert_eq!(tighter_upper(Bound::Unbounded, Bound::Included(a)), Bound::Included(a));
    }

    #[test]
    fn cursor_flags_combine() {
        let flags = CursorFlags::REVERSE | CursorFlags::STATIC_VIEW;
        assert!(flags.contains(CursorFlags::REVERSE));
        assert!(flags.contains(CursorFlags::STATIC_VIEW));
        assert!(!CursorFlags::NONE.contains(CursorFlags::REVERSE));
    }
}
