//! Multi-version keyspace storage and snapshot tracking.
//!
//! Each key keeps a short history of versions tagged with the sequence
//! number of the commit that wrote them. A reader at snapshot `S` sees, per
//! key, the newest version with `seq <= S`, unless a prefix tombstone with
//! `seq <= S` covers the key and is strictly newer than that version.
//!
//! The strict comparison is what orders a commit's prefix deletes before
//! its own puts: both carry the same sequence number, so the tombstone only
//! masks older versions.
//!
//! ## Invariants
//!
//! - Versions of a key are kept in ascending `seq` order
//! - Tombstones are kept in ascending `seq` order
//! - Garbage collection never removes a version some live snapshot can see

use crate::types::{KeyspaceId, SequenceNumber};
use crate::wal::WalOp;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Registry of live snapshots.
///
/// The garbage-collection horizon is the oldest registered snapshot, or the
/// latest committed sequence when none is registered.
#[derive(Debug, Default)]
pub(crate) struct SnapshotRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    committed: SequenceNumber,
    live: BTreeMap<SequenceNumber, usize>,
}

impl SnapshotRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a snapshot of the latest committed state.
    pub(crate) fn acquire_latest(self: &Arc<Self>) -> Snapshot {
        let mut inner = self.inner.lock();
        let seq = inner.committed;
        *inner.live.entry(seq).or_insert(0) += 1;
        Snapshot {
            seq,
            registry: Arc::clone(self),
        }
    }

    /// Makes every commit up to `seq` visible to new snapshots.
    pub(crate) fn publish(&self, seq: SequenceNumber) {
        let mut inner = self.inner.lock();
        if seq > inner.committed {
            inner.committed = seq;
        }
    }

    pub(crate) fn committed(&self) -> SequenceNumber {
        self.inner.lock().committed
    }

    pub(crate) fn horizon(&self) -> SequenceNumber {
        let inner = self.inner.lock();
        inner
            .live
            .keys()
            .next()
            .copied()
            .map_or(inner.committed, |oldest| oldest.min(inner.committed))
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.inner.lock().live.values().sum()
    }

    fn register(&self, seq: SequenceNumber) {
        *self.inner.lock().live.entry(seq).or_insert(0) += 1;
    }

    fn release(&self, seq: SequenceNumber) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.live.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                inner.live.remove(&seq);
            }
        }
    }
}

/// A registered read point. Cloning registers another reference; dropping
/// the last one lets garbage collection pass it.
#[derive(Debug)]
pub(crate) struct Snapshot {
    seq: SequenceNumber,
    registry: Arc<SnapshotRegistry>,
}

impl Snapshot {
    pub(crate) fn seq(&self) -> SequenceNumber {
        self.seq
    }
}

impl Clone for Snapshot {
    fn clone(&self) -> Self {
        self.registry.register(self.seq);
        Self {
            seq: self.seq,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.registry.release(self.seq);
    }
}

#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct PrefixTombstone {
    prefix: Vec<u8>,
    seq: SequenceNumber,
}

#[derive(Debug, Default)]
struct StoreInner {
    keys: BTreeMap<Vec<u8>, Vec<Version>>,
    tombstones: Vec<PrefixTombstone>,
}

impl StoreInner {
    fn visible<'v>(
        &self,
        key: &[u8],
        versions: &'v [Version],
        seq: SequenceNumber,
    ) -> Option<&'v [u8]> {
        let version = versions.iter().rev().find(|v| v.seq <= seq)?;
        let masked = self
            .tombstones
            .iter()
            .take_while(|t| t.seq <= seq)
            .any(|t| version.seq < t.seq && key.starts_with(&t.prefix));
        if masked {
            None
        } else {
            version.value.as_deref()
        }
    }
}

/// What one garbage-collection pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GcStats {
    pub versions_removed: usize,
    pub tombstones_removed: usize,
}

/// Versioned contents of one keyspace.
#[derive(Debug)]
pub(crate) struct KeyspaceStore {
    id: KeyspaceId,
    inner: RwLock<StoreInner>,
}

impl KeyspaceStore {
    pub(crate) fn new(id: KeyspaceId) -> Self {
        Self {
            id,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub(crate) fn id(&self) -> KeyspaceId {
        self.id
    }

    pub(crate) fn get(&self, key: &[u8], seq: SequenceNumber) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        let versions = inner.keys.get(key)?;
        inner.visible(key, versions, seq).map(<[u8]>::to_vec)
    }

    /// Finds the first visible entry strictly inside `(lower, upper)` in scan
    /// direction, skipping keys for which `skip` returns true.
    pub(crate) fn next_visible(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
        seq: SequenceNumber,
        mut skip: impl FnMut(&[u8]) -> bool,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        if !range_is_valid(lower, upper) {
            return None;
        }
        let inner = self.inner.read();
        let range = inner.keys.range::<[u8], _>((lower, upper));
        let mut pick = |(key, versions): (&Vec<u8>, &Vec<Version>)| {
            if skip(key) {
                return None;
            }
            inner
                .visible(key, versions, seq)
                .map(|value| (key.clone(), value.to_vec()))
        };
        if reverse {
            range.rev().find_map(&mut pick)
        } else {
            range.into_iter().find_map(&mut pick)
        }
    }

    /// Whether a prefix delete newer than `seq` overlaps `filter`.
    pub(crate) fn prefix_deleted_since(&self, seq: SequenceNumber, filter: &[u8]) -> bool {
        self.inner
            .read()
            .tombstones
            .iter()
            .rev()
            .take_while(|t| t.seq > seq)
            .any(|t| t.prefix.starts_with(filter) || filter.starts_with(&t.prefix))
    }

    /// Applies the ops of one commit. Ops for other keyspaces are ignored.
    pub(crate) fn apply(&self, seq: SequenceNumber, ops: &[&WalOp]) {
        let mut inner = self.inner.write();
        for op in ops {
            match op {
                WalOp::PrefixDelete { kvs, prefix } if *kvs == self.id => {
                    inner.tombstones.push(PrefixTombstone {
                        prefix: prefix.clone(),
                        seq,
                    });
                }
                WalOp::Put { kvs, key, value } if *kvs == self.id => {
                    push_version(&mut inner.keys, key, seq, Some(value.clone()));
                }
                WalOp::Delete { kvs, key } if *kvs == self.id => {
                    push_version(&mut inner.keys, key, seq, None);
                }
                _ => {}
            }
        }
    }

    /// Every entry visible at `seq`, in key order.
    pub(crate) fn entries_at(&self, seq: SequenceNumber) -> Vec<(Vec<u8>, Vec<u8>)> {
        let inner = self.inner.read();
        inner
            .keys
            .iter()
            .filter_map(|(key, versions)| {
                inner
                    .visible(key, versions, seq)
                    .map(|value| (key.clone(), value.to_vec()))
            })
            .collect()
    }

    /// Drops history no snapshot at or after `horizon` can observe.
    pub(crate) fn gc(&self, horizon: SequenceNumber) -> GcStats {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut stats = GcStats::default();

        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.tombstones)
            .into_iter()
            .partition(|t| t.seq <= horizon);
        inner.tombstones = kept;
        stats.tombstones_removed = expired.len();

        inner.keys.retain(|key, versions| {
            // index of the version visible at the horizon
            let Some(base) = versions.iter().rposition(|v| v.seq <= horizon) else {
                return true;
            };
            let before = versions.len();
            versions.drain(..base);

            let base = &versions[0];
            let masked = expired
                .iter()
                .any(|t| base.seq < t.seq && key.starts_with(&t.prefix));
            if masked || base.value.is_none() {
                versions.remove(0);
            }
            stats.versions_removed += before - versions.len();
            !versions.is_empty()
        });
        stats
    }

    /// Encoded size of the live state at `seq`, as a compacted data log
    /// would hold it.
    pub(crate) fn live_bytes(&self, seq: SequenceNumber) -> u64 {
        let inner = self.inner.read();
        inner
            .keys
            .iter()
            .filter_map(|(key, versions)| {
                inner
                    .visible(key, versions, seq)
                    .map(|value| put_op_len(key.len(), value.len()))
            })
            .sum()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write();
        inner.keys.clear();
        inner.tombstones.clear();
    }
}

/// Encoded size of a put op: tag, keyspace id and two length-prefixed fields.
pub(crate) fn put_op_len(key_len: usize, value_len: usize) -> u64 {
    (1 + 4 + 4 + key_len + 4 + value_len) as u64
}

fn push_version(
    keys: &mut BTreeMap<Vec<u8>, Vec<Version>>,
    key: &[u8],
    seq: SequenceNumber,
    value: Option<Vec<u8>>,
) {
    let versions = keys.entry(key.to_vec()).or_default();
    match versions.last_mut() {
        // a commit writes each key at most once, replay can repeat it
        Some(last) if last.seq == seq => last.value = value,
        _ => versions.push(Version { seq, value }),
    }
}

/// `BTreeMap::range` panics on an inverted or empty excluded range.
pub(crate) fn range_is_valid(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo <= hi,
        (Bound::Included(lo), Bound::Excluded(hi)) | (Bound::Excluded(lo), Bound::Included(hi)) => {
            lo < hi
        }
        (Bound::Excluded(lo), Bound::Excluded(hi)) => lo < hi,
        _ => true,
    }
}
