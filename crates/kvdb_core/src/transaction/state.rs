//! Transaction state and buffered writes.

use crate::types::KeyspaceId;
use crate::wal::WalOp;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Allocated, never begun.
    Invalid,
    /// Between `begin` and `commit`/`abort`.
    Active,
    /// Last cycle ended in a commit.
    Committed,
    /// Last cycle ended in an abort.
    Aborted,
}

/// What a transaction's own writes say about one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteLookup<'a> {
    /// The transaction put this value.
    Value(&'a [u8]),
    /// The transaction deleted the key, directly or by prefix.
    Deleted,
    /// The transaction did not touch the key.
    Untouched,
}

/// Buffered writes to one keyspace.
#[derive(Debug, Default)]
pub(crate) struct KvsWrites {
    prefix_deletes: Vec<Vec<u8>>,
    keys: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl KvsWrites {
    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) {
        self.keys.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn delete(&mut self, key: &[u8]) {
        self.keys.insert(key.to_vec(), None);
    }

    /// Records a prefix delete. Writes buffered earlier under the prefix
    /// are dropped; later ones survive it.
    pub(crate) fn prefix_delete(&mut self, prefix: &[u8]) {
        self.keys.retain(|key, _| !key.starts_with(prefix));
        self.prefix_deletes.push(prefix.to_vec());
    }

    pub(crate) fn lookup(&self, key: &[u8]) -> WriteLookup<'_> {
        match self.keys.get(key) {
            Some(Some(value)) => WriteLookup::Value(value),
            Some(None) => WriteLookup::Deleted,
            None if self.under_prefix_delete(key) => WriteLookup::Deleted,
            None => WriteLookup::Untouched,
        }
    }

    /// Whether the committed version of `key` is hidden from this
    /// transaction.
    pub(crate) fn masks(&self, key: &[u8]) -> bool {
        self.keys.contains_key(key) || self.under_prefix_delete(key)
    }

    /// First buffered put inside `(lower, upper)` in scan direction.
    pub(crate) fn next_put(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
    ) -> Option<(&[u8], &[u8])> {
        if !crate::store::range_is_valid(lower, upper) {
            return None;
        }
        let mut range = self
            .keys
            .range::<[u8], _>((lower, upper))
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_slice(), v)));
        if reverse {
            range.next_back()
        } else {
            range.next()
        }
    }

    fn under_prefix_delete(&self, key: &[u8]) -> bool {
        self.prefix_deletes.iter().any(|p| key.starts_with(p))
    }

    fn is_empty(&self) -> bool {
        self.prefix_deletes.is_empty() && self.keys.is_empty()
    }
}

/// All buffered writes of a transaction.
#[derive(Debug, Default)]
pub(crate) struct PendingWrites {
    per_kvs: BTreeMap<KeyspaceId, KvsWrites>,
}

impl PendingWrites {
    pub(crate) fn kvs(&self, id: KeyspaceId) -> Option<&KvsWrites> {
        self.per_kvs.get(&id)
    }

    pub(crate) fn kvs_mut(&mut self, id: KeyspaceId) -> &mut KvsWrites {
        self.per_kvs.entry(id).or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.per_kvs.clear();
    }

    /// Number of buffered key writes and prefix deletes.
    pub(crate) fn len(&self) -> usize {
        self.per_kvs
            .values()
            .map(|w| w.keys.len() + w.prefix_deletes.len())
            .sum()
    }

    /// Drains the buffer into data log ops, prefix deletes first.
    pub(crate) fn take_ops(&mut self) -> Vec<WalOp> {
        let per_kvs = std::mem::take(&mut self.per_kvs);
        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        for (kvs, w) in per_kvs.into_iter().filter(|(_, w)| !w.is_empty()) {
            deletes.extend(
                w.prefix_deletes
                    .into_iter()
                    .map(|prefix| WalOp::PrefixDelete { kvs, prefix }),
            );
            writes.extend(w.keys.into_iter().map(|(key, value)| match value {
                Some(value) => WalOp::Put { kvs, key, value },
                None => WalOp::Delete { kvs, key },
            }));
        }
        deletes.extend(writes);
        deletes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KVS: KeyspaceId = KeyspaceId::new(3);

    #[test]
    fn lookup_reports_own_writes() {
        let mut w = KvsWrites::default();
        w.put(b"a", b"1");
        w.delete(b"b");

        assert_eq!(w.lookup(b"a"), WriteLookup::Value(b"1"));
        assert_eq!(w.lookup(b"b"), WriteLookup::Deleted);
        assert_eq!(w.lookup(b"c"), WriteLookup::Untouched);
    }

    #[test]
    fn prefix_delete_drops_earlier_writes_only() {
        let mut w = KvsWrites::default();
        w.put(b"key1", b"v");
        w.prefix_delete(b"key");
        w.put(b"key2", b"v");

        assert_eq!(w.lookup(b"key1"), WriteLookup::Deleted);
        assert_eq!(w.lookup(b"key2"), WriteLookup::Value(b"v"));
        assert!(w.masks(b"key9"));
        assert!(!w.masks(b"other"));
    }

    #[test]
    fn take_ops_puts_prefix_deletes_first() {
        let mut pending = PendingWrites::default();
        pending.kvs_mut(KVS).put(b"x", b"1");
        pending.kvs_mut(KeyspaceId::new(4)).prefix_delete(b"p");
        pending.kvs_mut(KVS).prefix_delete(b"q");
        assert_eq!(pending.len(), 3);

        let ops = pending.take_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], WalOp::PrefixDelete { .. }));
        assert!(matches!(ops[1], WalOp::PrefixDelete { .. }));
        assert!(matches!(ops[2], WalOp::Put { .. }));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn next_put_skips_deletes() {
        let mut w = KvsWrites::default();
        w.put(b"a", b"1");
        w.delete(b"b");
        w.put(b"c", b"3");

        let fwd = w.next_put(Bound::Excluded(b"a"), Bound::Unbounded, false);
        assert_eq!(fwd.map(|(k, _)| k), Some(&b"c"[..]));
        let rev = w.next_put(Bound::Unbounded, Bound::Excluded(b"c"), true);
        assert_eq!(rev.map(|(k, _)| k), Some(&b"a"[..]));
    }
}
