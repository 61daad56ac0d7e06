//! Keyspace handles and point operations.

use crate::cursor::{Cursor, CursorBinding, CursorFlags};
use crate::database::DbShared;
use crate::error::{KvdbError, KvdbResult};
use crate::limits::{check_filter, check_key, check_value};
use crate::store::KeyspaceStore;
use crate::transaction::{Transaction, TxnCore, WriteLookup};
use crate::wal::WalOp;
use std::sync::Arc;

/// Flags for [`Keyspace::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutFlags(u8);

impl PutFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Bypass put throttling.
    pub const PRIORITY: Self = Self(1);

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PutFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Counts as an open handle on a keyspace until dropped.
#[derive(Debug)]
pub(crate) struct KvsHandle {
    db: Arc<DbShared>,
    name: String,
}

impl KvsHandle {
    pub(crate) fn new(db: Arc<DbShared>, name: String) -> Arc<Self> {
        Arc::new(Self { db, name })
    }

    pub(crate) fn db(&self) -> &Arc<DbShared> {
        &self.db
    }
}

impl Drop for KvsHandle {
    fn drop(&mut self) {
        self.db.release_handle(&self.name);
    }
}

/// An open keyspace.
///
/// Every operation takes an optional transaction. With `None` the
/// operation runs on its own: a write is committed immediately, a read
/// sees the latest committed state.
///
/// A keyspace cannot be dropped while a handle or a cursor created from it
/// is alive.
#[derive(Debug)]
pub struct Keyspace {
    handle: Arc<KvsHandle>,
    store: Arc<KeyspaceStore>,
    prefix_len: usize,
}

impl Keyspace {
    pub(crate) fn new(handle: Arc<KvsHandle>, store: Arc<KeyspaceStore>, prefix_len: usize) -> Self {
        Self {
            handle,
            store,
            prefix_len,
        }
    }

    /// Keyspace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Length of the key prefix used by prefix deletes, 0 if unset.
    #[must_use]
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Stores `value` under `key`.
    ///
    /// Non-priority puts may block while the database throttles writes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or oversized key, an oversized
    /// value or a transaction of another database, and `InvalidState` for a
    /// transaction that is not active.
    pub fn put(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> KvdbResult<()> {
        self.db().ensure_open()?;
        check_key(key)?;
        check_value(value)?;
        let waited = self.db().throttle.admit(flags.contains(PutFlags::PRIORITY));
        if !waited.is_zero() {
            tracing::trace!(kvs = self.name(), ?waited, "put delayed by throttle");
        }

        match txn {
            Some(txn) => {
                let core = self.txn_core(txn)?;
                core.active()?
                    .writes
                    .kvs_mut(self.store.id())
                    .put(key, value);
                Ok(())
            }
            None => self.commit_one(WalOp::Put {
                kvs: self.store.id(),
                key: key.to_vec(),
                value: value.to_vec(),
            }),
        }
    }

    /// Reads the value of `key`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad key or foreign transaction and
    /// `InvalidState` for an inactive transaction.
    pub fn get(&self, txn: Option<&Transaction>, key: &[u8]) -> KvdbResult<Option<Vec<u8>>> {
        self.db().ensure_open()?;
        check_key(key)?;

        match txn {
            Some(txn) => {
                let core = self.txn_core(txn)?;
                let inner = core.active()?;
                if let Some(writes) = inner.writes.kvs(self.store.id()) {
                    match writes.lookup(key) {
                        WriteLookup::Value(value) => return Ok(Some(value.to_vec())),
                        WriteLookup::Deleted => return Ok(None),
                        WriteLookup::Untouched => {}
                    }
                }
                Ok(self.store.get(key, inner.snapshot_seq()?))
            }
            None => {
                let snapshot = self.db().registry.acquire_latest();
                Ok(self.store.get(key, snapshot.seq()))
            }
        }
    }

    /// Deletes `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn delete(&self, txn: Option<&Transaction>, key: &[u8]) -> KvdbResult<()> {
        self.db().ensure_open()?;
        check_key(key)?;

        match txn {
            Some(txn) => {
                let core = self.txn_core(txn)?;
                core.active()?.writes.kvs_mut(self.store.id()).delete(key);
                Ok(())
            }
            None => self.commit_one(WalOp::Delete {
                kvs: self.store.id(),
                key: key.to_vec(),
            }),
        }
    }

    /// Deletes every key starting with `filter`.
    ///
    /// Inside a transaction, writes buffered earlier under the prefix are
    /// discarded; writes made after the prefix delete are kept.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or oversized filter or a
    /// foreign transaction, and `InvalidState` for an inactive transaction.
    pub fn prefix_delete(&self, txn: Option<&Transaction>, filter: &[u8]) -> KvdbResult<()> {
        self.db().ensure_open()?;
        if filter.is_empty() {
            return Err(KvdbError::invalid_argument("prefix filter is empty"));
        }
        check_filter(filter)?;

        match txn {
            Some(txn) => {
                let core = self.txn_core(txn)?;
                core.active()?
                    .writes
                    .kvs_mut(self.store.id())
                    .prefix_delete(filter);
                Ok(())
            }
            None => self.commit_one(WalOp::PrefixDelete {
                kvs: self.store.id(),
                prefix: filter.to_vec(),
            }),
        }
    }

    /// Opens a cursor over the keys starting with `filter`, or every key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an oversized filter or a foreign
    /// transaction, and `InvalidState` for an inactive transaction.
    pub fn cursor(
        &self,
        filter: Option<&[u8]>,
        flags: CursorFlags,
        binding: CursorBinding<'_>,
    ) -> KvdbResult<Cursor> {
        self.db().ensure_open()?;
        let filter = filter.unwrap_or_default();
        check_filter(filter)?;
        if let Some(txn) = binding.transaction() {
            self.txn_core(txn)?;
        }
        Cursor::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.store),
            filter.to_vec(),
            flags,
            binding,
        )
    }

    /// Closes the handle. Equivalent to dropping it.
    pub fn close(self) {}

    fn db(&self) -> &Arc<DbShared> {
        self.handle.db()
    }

    fn txn_core<'t>(&self, txn: &'t Transaction) -> KvdbResult<&'t Arc<TxnCore>> {
        let core = txn.core();
        if Arc::ptr_eq(&core.db, self.db()) {
            Ok(core)
        } else {
            Err(KvdbError::invalid_argument(
                "transaction belongs to another database",
            ))
        }
    }

    fn commit_one(&self, op: WalOp) -> KvdbResult<()> {
        self.db().commit(vec![op])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::limits::{KVS_KEY_LEN_MAX, KVS_VALUE_LEN_MAX};
    use crate::{runtime, Database};

    fn setup(params: &[&str]) -> (Database, Keyspace) {
        runtime::init(None, &[]).unwrap();
        let db = Database::open_in_memory(&[]).unwrap();
        db.create_keyspace("kvs", params).unwrap();
        let kvs = db.open_keyspace("kvs", &[]).unwrap();
        (db, kvs)
    }

    #[test]
    fn put_get_delete_without_transaction() {
        let (_db, kvs) = setup(&[]);
        kvs.put(None, b"k", b"v", PutFlags::NONE).unwrap();
        assert_eq!(kvs.get(None, b"k").unwrap(), Some(b"v".to_vec()));
        kvs.delete(None, b"k").unwrap();
        assert_eq!(kvs.get(None, b"k").unwrap(), None);
        kvs.delete(None, b"never-there").unwrap();
    }

    #[test]
    fn key_and_value_limits() {
        let (_db, kvs) = setup(&[]);
        let long_key = vec![b'k'; KVS_KEY_LEN_MAX];
        let big_value = vec![0u8; KVS_VALUE_LEN_MAX];
        kvs.put(None, &long_key, &big_value, PutFlags::NONE).unwrap();
        assert_eq!(kvs.get(None, &long_key).unwrap().map(|v| v.len()), Some(KVS_VALUE_LEN_MAX));

        kvs.put(None, b"empty", b"", PutFlags::NONE).unwrap();
        assert_eq!(kvs.get(None, b"empty").unwrap(), Some(Vec::new()));

        let too_long = vec![b'k'; KVS_KEY_LEN_MAX + 1];
        let err = kvs.put(None, &too_long, b"v", PutFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = kvs
            .put(None, b"k", &vec![0u8; KVS_VALUE_LEN_MAX + 1], PutFlags::NONE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(kvs.get(None, b"").unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn prefix_delete_ignores_prefix_length() {
        let (_db, kvs) = setup(&["prefix.length=3"]);
        assert_eq!(kvs.prefix_len(), 3);
        const KEYS: [&[u8]; 6] = [b"abc1", b"abc2", b"abd1", b"abd2", b"acx1", b"b001"];
        for key in KEYS {
            kvs.put(None, key, b"v", PutFlags::NONE).unwrap();
        }
        fn present(kvs: &Keyspace) -> Vec<&'static [u8]> {
            KEYS.into_iter()
                .filter(|key| kvs.get(None, key).unwrap().is_some())
                .collect()
        }

        // longer than the prefix length
        kvs.prefix_delete(None, b"abc1").unwrap();
        assert_eq!(present(&kvs), [&b"abc2"[..], b"abd1", b"abd2", b"acx1", b"b001"]);

        // equal to the prefix length
        kvs.prefix_delete(None, b"abd").unwrap();
        assert_eq!(present(&kvs), [&b"abc2"[..], b"acx1", b"b001"]);

        // shorter than the prefix length
        kvs.prefix_delete(None, b"ab").unwrap();
        assert_eq!(present(&kvs), [&b"acx1"[..], b"b001"]);
        kvs.prefix_delete(None, b"a").unwrap();
        assert_eq!(present(&kvs), [&b"b001"[..]]);

        let mut cursor = kvs
            .cursor(Some(b"a"), CursorFlags::NONE, CursorBinding::Free)
            .unwrap();
        assert_eq!(cursor.read().unwrap(), None);

        assert_eq!(
            kvs.prefix_delete(None, b"").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let (db, kvs) = setup(&[]);
        kvs.put(None, b"a", b"committed", PutFlags::NONE).unwrap();

        let mut txn = db.txn_alloc().unwrap();
        txn.begin().unwrap();
        kvs.put(Some(&txn), b"b", b"mine", PutFlags::PRIORITY).unwrap();
        kvs.delete(Some(&txn), b"a").unwrap();
        assert_eq!(kvs.get(Some(&txn), b"b").unwrap(), Some(b"mine".to_vec()));
        assert_eq!(kvs.get(Some(&txn), b"a").unwrap(), None);

        assert_eq!(kvs.get(None, b"a").unwrap(), Some(b"committed".to_vec()));
        assert_eq!(kvs.get(None, b"b").unwrap(), None);

        txn.commit().unwrap();
        assert_eq!(kvs.get(None, b"a").unwrap(), None);
        assert_eq!(kvs.get(None, b"b").unwrap(), Some(b"mine".to_vec()));
    }

    #[test]
    fn inactive_or_foreign_transaction_is_rejected() {
        let (db, kvs) = setup(&[]);
        let txn = db.txn_alloc().unwrap();
        let err = kvs.put(Some(&txn), b"k", b"v", PutFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let other = Database::open_in_memory(&[]).unwrap();
        let mut foreign = other.txn_alloc().unwrap();
        foreign.begin().unwrap();
        let err = kvs.get(Some(&foreign), b"k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn put_flags_combine() {
        let flags = PutFlags::NONE | PutFlags::PRIORITY;
        assert!(flags.contains(PutFlags::PRIORITY));
        assert!(!PutFlags::NONE.contains(PutFlags::PRIORITY));
    }
}
