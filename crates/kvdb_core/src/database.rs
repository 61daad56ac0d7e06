//! Database facade, keyspace catalog and recovery.

use crate::compaction::{self, CompactRequest, CompactStatus, CompactionControl};
use crate::config::DbConfig;
use crate::dir::DatabaseDir;
use crate::error::{KvdbError, KvdbResult};
use crate::keyspace::{KvsHandle, Keyspace};
use crate::limits::check_name;
use crate::manifest::Manifest;
use crate::params::Params;
use crate::runtime;
use crate::store::{KeyspaceStore, SnapshotRegistry};
use crate::throttle::Throttle;
use crate::transaction::Transaction;
use crate::types::{KeyspaceId, SequenceNumber, TransactionId};
use crate::wal::{DataLog, WalOp, WalRecord};
use kvdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A database: a set of named keyspaces sharing one commit order.
///
/// The engine runtime must be initialized before any database is created
/// or opened:
///
/// ```
/// use kvdb_core::{runtime, CursorBinding, CursorFlags, Database, PutFlags};
///
/// runtime::init(None, &[]).unwrap();
///
/// let db = Database::open_in_memory(&[]).unwrap();
/// db.create_keyspace("users", &[]).unwrap();
/// let kvs = db.open_keyspace("users", &[]).unwrap();
///
/// let mut txn = db.txn_alloc().unwrap();
/// txn.begin().unwrap();
/// kvs.put(Some(&txn), b"alice", b"1", PutFlags::NONE).unwrap();
/// txn.commit().unwrap();
///
/// let mut cursor = kvs.cursor(None, CursorFlags::NONE, CursorBinding::Free).unwrap();
/// assert_eq!(cursor.read().unwrap(), Some((b"alice".to_vec(), b"1".to_vec())));
/// assert_eq!(cursor.read().unwrap(), None);
/// ```
///
/// Administrative calls (keyspace create/drop, close) take `&self` but are
/// meant for setup and teardown, not for racing against data operations.
/// [`sync`](Self::sync), [`compact`](Self::compact) and
/// [`compact_status`](Self::compact_status) are safe to call from any
/// thread at any time.
///
/// After [`close`](Self::close) every operation on the database or on a
/// handle derived from it fails with `InvalidState`.
#[derive(Debug)]
pub struct Database {
    shared: Arc<DbShared>,
}

/// State shared by the database handle and everything derived from it.
pub(crate) struct DbShared {
    home: Mutex<Option<DatabaseDir>>,
    home_path: Option<PathBuf>,
    pub(crate) config: DbConfig,
    params: Params,
    pub(crate) registry: Arc<SnapshotRegistry>,
    /// Held across sequence allocation, log append and apply.
    log: Mutex<DataLog>,
    catalog: Mutex<Catalog>,
    stores: RwLock<HashMap<KeyspaceId, Arc<KeyspaceStore>>>,
    pub(crate) throttle: Throttle,
    pub(crate) compaction: CompactionControl,
    next_txn_id: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Catalog {
    manifest: Manifest,
    open_handles: HashMap<String, usize>,
}

/// Frame overhead of a commit record: envelope, seq and op count.
const COMMIT_FRAME_LEN: u64 = 11 + 4 + 8 + 4;

/// Size of the checkpoint record heading a compacted log.
const CHECKPOINT_FRAME_LEN: u64 = 11 + 4 + 8;

/// Live entries per commit record when rewriting the log.
const REWRITE_CHUNK_BYTES: u64 = 4 * 1024 * 1024;

impl Database {
    /// Creates a database in `home`.
    ///
    /// `params` are `key=value` assignments layered over the runtime
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `home` already holds a database,
    /// `InvalidState` if the runtime is not initialized, or a parameter
    /// error.
    pub fn create(home: &Path, params: &[&str]) -> KvdbResult<Self> {
        let (params, config) = resolve_params(params)?;
        let dir = DatabaseDir::create(home)?;
        let backend = FileBackend::open(&dir.data_log_path())?;
        let manifest = dir.load_manifest()?;

        tracing::info!(home = %home.display(), "creating database");
        Self::start(Some(dir), Box::new(backend), manifest, params, config)
    }

    /// Opens the database in `home`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no database, `PermissionDenied` if it
    /// cannot be accessed, `Busy` if it is already open, `InvalidState` if
    /// the runtime is not initialized, or a corruption error from recovery.
    pub fn open(home: &Path, params: &[&str]) -> KvdbResult<Self> {
        let (params, config) = resolve_params(params)?;
        let dir = DatabaseDir::open(home)?;
        let manifest = dir.load_manifest()?;
        let backend = FileBackend::open(&dir.data_log_path())?;

        tracing::info!(home = %home.display(), "opening database");
        Self::start(Some(dir), Box::new(backend), manifest, params, config)
    }

    /// Opens a database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the runtime is not initialized, or a
    /// parameter error.
    pub fn open_in_memory(params: &[&str]) -> KvdbResult<Self> {
        let (params, config) = resolve_params(params)?;
        Self::start(
            None,
            Box::new(InMemoryBackend::new()),
            Manifest::new(),
            params,
            config,
        )
    }

    /// Removes the closed database in `home`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no database, `Busy` if it is open.
    pub fn destroy(home: &Path) -> KvdbResult<()> {
        runtime::defaults()?;
        DatabaseDir::destroy(home)?;
        tracing::info!(home = %home.display(), "database destroyed");
        Ok(())
    }

    fn start(
        home: Option<DatabaseDir>,
        backend: Box<dyn StorageBackend>,
        manifest: Manifest,
        params: Params,
        config: DbConfig,
    ) -> KvdbResult<Self> {
        let mut log = DataLog::new(backend, config.sync_on_commit);
        let records = log.replay()?;

        let stores: HashMap<_, _> = manifest
            .keyspaces
            .iter()
            .map(|e| (e.id, Arc::new(KeyspaceStore::new(e.id))))
            .collect();
        let registry = SnapshotRegistry::new();

        let record_count = records.len();
        for record in &records {
            match record {
                WalRecord::Commit { seq, ops } => apply_ops(&stores, *seq, ops),
                WalRecord::Checkpoint { .. } => {}
            }
            registry.publish(record.seq());
        }

        tracing::info!(
            keyspaces = stores.len(),
            records = record_count,
            committed = %registry.committed(),
            "database ready"
        );

        let shared = DbShared {
            home_path: home.as_ref().map(|d| d.path().to_path_buf()),
            home: Mutex::new(home),
            throttle: Throttle::new(config.effective_rate()),
            config,
            params,
            registry,
            log: Mutex::new(log),
            catalog: Mutex::new(Catalog {
                manifest,
                open_handles: HashMap::new(),
            }),
            stores: RwLock::new(stores),
            compaction: CompactionControl::default(),
            next_txn_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Home directory, `None` for an in-memory database.
    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.shared.home_path.as_deref()
    }

    /// Resolved database settings.
    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Creates a keyspace.
    ///
    /// `params` may use bare names (`prefix.length=3`) or full
    /// `kvs.` keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad name or parameter,
    /// `AlreadyExists` for a taken name and `ResourceExhausted` when the
    /// database holds the maximum number of keyspaces.
    pub fn create_keyspace(&self, name: &str, params: &[&str]) -> KvdbResult<()> {
        self.shared.ensure_open()?;
        check_name(name)?;
        let kvs_params = Params::parse_for_keyspace(name, params)?;
        let config = self.shared.params.merged(&kvs_params).kvs_config(name)?;

        let mut catalog = self.shared.catalog.lock();
        let id = catalog.manifest.add_keyspace(name, config.prefix_length)?;
        if let Err(e) = self.shared.save_manifest(&catalog.manifest) {
            catalog.manifest.remove_keyspace(name);
            return Err(e);
        }
        self.shared
            .stores
            .write()
            .insert(id, Arc::new(KeyspaceStore::new(id)));

        tracing::info!(name, %id, prefix_length = config.prefix_length, "keyspace created");
        Ok(())
    }

    /// Drops a keyspace and all its data.
    ///
    /// Writes to the keyspace still buffered in active transactions are
    /// discarded when those transactions commit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name and `Busy` while a handle or
    /// cursor on the keyspace is open.
    pub fn drop_keyspace(&self, name: &str) -> KvdbResult<()> {
        self.shared.ensure_open()?;
        let mut catalog = self.shared.catalog.lock();
        if catalog.open_handles.get(name).copied().unwrap_or(0) > 0 {
            return Err(KvdbError::busy(format!("keyspace {name:?} is open")));
        }
        let entry = catalog
            .manifest
            .remove_keyspace(name)
            .ok_or_else(|| KvdbError::not_found(format!("keyspace {name:?}")))?;
        if let Err(e) = self.shared.save_manifest(&catalog.manifest) {
            catalog.manifest.keyspaces.push(entry);
            return Err(e);
        }
        if let Some(store) = self.shared.stores.write().remove(&entry.id) {
            store.clear();
        }

        tracing::info!(name, id = %entry.id, "keyspace dropped");
        Ok(())
    }

    /// Opens a handle on an existing keyspace.
    ///
    /// The prefix length is fixed at creation; open-time `params` are
    /// validated but have no effect.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name or `InvalidArgument` for a bad
    /// parameter.
    pub fn open_keyspace(&self, name: &str, params: &[&str]) -> KvdbResult<Keyspace> {
        self.shared.ensure_open()?;
        check_name(name)?;
        Params::parse_for_keyspace(name, params)?;

        let mut catalog = self.shared.catalog.lock();
        let entry = catalog
            .manifest
            .get(name)
            .cloned()
            .ok_or_else(|| KvdbError::not_found(format!("keyspace {name:?}")))?;
        let store = self
            .shared
            .stores
            .read()
            .get(&entry.id)
            .cloned()
            .ok_or_else(|| KvdbError::not_found(format!("keyspace {name:?}")))?;
        *catalog.open_handles.entry(entry.name.clone()).or_insert(0) += 1;
        drop(catalog);

        tracing::debug!(name, id = %entry.id, "keyspace opened");
        let handle = KvsHandle::new(Arc::clone(&self.shared), entry.name);
        Ok(Keyspace::new(handle, store, entry.prefix_length))
    }

    /// Names of all keyspaces, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after close.
    pub fn keyspace_names(&self) -> KvdbResult<Vec<String>> {
        self.shared.ensure_open()?;
        let catalog = self.shared.catalog.lock();
        Ok(catalog
            .manifest
            .keyspaces
            .iter()
            .map(|e| e.name.clone())
            .collect())
    }

    /// Allocates a transaction in the `Invalid` state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after close.
    pub fn txn_alloc(&self) -> KvdbResult<Transaction> {
        self.shared.ensure_open()?;
        let id = self.shared.next_txn_id.fetch_add(1, Ordering::Relaxed);
        Ok(Transaction::new(
            Arc::clone(&self.shared),
            TransactionId::new(id),
        ))
    }

    /// Makes every committed mutation durable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after close, or the data log sync error.
    pub fn sync(&self) -> KvdbResult<()> {
        self.shared.ensure_open()?;
        self.shared.log.lock().sync()
    }

    /// Requests compaction, or cancels a running one.
    ///
    /// Compaction runs on a background thread; poll
    /// [`compact_status`](Self::compact_status) to follow it. A request
    /// while compaction is already active is ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after close, or an I/O error if the worker
    /// thread cannot be started.
    pub fn compact(&self, request: CompactRequest) -> KvdbResult<()> {
        self.shared.ensure_open()?;
        compaction::request(&self.shared, request)
    }

    /// Samples compaction progress and space amplification.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after close.
    pub fn compact_status(&self) -> KvdbResult<CompactStatus> {
        self.shared.ensure_open()?;
        self.shared.compact_status()
    }

    /// Closes the database.
    ///
    /// Stops a running compaction, syncs the data log and releases the home
    /// directory lock. Closing twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns the data log sync error; the database is closed regardless.
    pub fn close(&self) -> KvdbResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        compaction::stop(&self.shared);
        self.shared.closed.store(true, Ordering::Release);
        let synced = self.shared.log.lock().sync();
        self.shared.home.lock().take();

        tracing::info!(home = ?self.shared.home_path, "database closed");
        synced
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error closing database on drop");
        }
    }
}

impl DbShared {
    pub(crate) fn ensure_open(&self) -> KvdbResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(KvdbError::database_closed())
        } else {
            Ok(())
        }
    }

    /// Publishes `ops` atomically under the next sequence number.
    ///
    /// Ops on keyspaces dropped in the meantime are discarded.
    pub(crate) fn commit(&self, ops: Vec<WalOp>) -> KvdbResult<SequenceNumber> {
        self.ensure_open()?;
        let mut log = self.log.lock();
        let stores = self.stores.read();

        let ops: Vec<WalOp> = ops
            .into_iter()
            .filter(|op| stores.contains_key(&op.keyspace()))
            .collect();
        if ops.is_empty() {
            return Ok(self.registry.committed());
        }

        let seq = self.registry.committed().next();
        let record = WalRecord::Commit { seq, ops };
        log.append(&record)?;
        if let WalRecord::Commit { ops, .. } = &record {
            apply_ops(&stores, seq, ops);
        }
        self.registry.publish(seq);
        Ok(seq)
    }

    pub(crate) fn release_handle(&self, name: &str) {
        let mut catalog = self.catalog.lock();
        if let Some(count) = catalog.open_handles.get_mut(name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                catalog.open_handles.remove(name);
            }
        }
    }

    pub(crate) fn stores(&self) -> Vec<Arc<KeyspaceStore>> {
        let mut stores: Vec<_> = self.stores.read().values().cloned().collect();
        stores.sort_by_key(|s| s.id());
        stores
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn save_manifest(&self, manifest: &Manifest) -> KvdbResult<()> {
        match &*self.home.lock() {
            Some(dir) => dir.save_manifest(manifest),
            None => Ok(()),
        }
    }

    /// Rewrites the data log to hold only the latest committed state.
    pub(crate) fn rewrite_log(&self) -> KvdbResult<(u64, u64)> {
        let mut log = self.log.lock();
        let stores = self.stores.read();
        let seq = self.registry.committed();
        let before = log.size()?;

        let mut records = vec![WalRecord::Checkpoint { seq }];
        let mut ops = Vec::new();
        let mut chunk_bytes = 0;
        let mut ids: Vec<_> = stores.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(store) = stores.get(&id) else {
                continue;
            };
            for (key, value) in store.entries_at(seq) {
                chunk_bytes += crate::store::put_op_len(key.len(), value.len());
                ops.push(WalOp::Put {
                    kvs: id,
                    key,
                    value,
                });
                if chunk_bytes >= REWRITE_CHUNK_BYTES {
                    records.push(WalRecord::Commit {
                        seq,
                        ops: std::mem::take(&mut ops),
                    });
                    chunk_bytes = 0;
                }
            }
        }
        if !ops.is_empty() {
            records.push(WalRecord::Commit { seq, ops });
        }

        log.rewrite(&records)?;
        Ok((before, log.size()?))
    }

    /// Data log size as a percentage of the live state's encoded size.
    pub(crate) fn space_amp_pct(&self) -> KvdbResult<u32> {
        let log_bytes = self.log.lock().size()?;
        if log_bytes == 0 {
            return Ok(100);
        }
        let seq = self.registry.committed();
        let entry_bytes: u64 = self.stores().iter().map(|s| s.live_bytes(seq)).sum();
        let frame = if entry_bytes > 0 { COMMIT_FRAME_LEN } else { 0 };
        let live_bytes = CHECKPOINT_FRAME_LEN + frame + entry_bytes;

        let pct = log_bytes.saturating_mul(100) / live_bytes;
        Ok(u32::try_from(pct).unwrap_or(u32::MAX))
    }

    fn compact_status(&self) -> KvdbResult<CompactStatus> {
        Ok(CompactStatus {
            samp_lwm_pct: self.config.lwm_pct,
            samp_hwm_pct: self.config.hwm_pct,
            samp_curr_pct: self.space_amp_pct()?,
            active: self.compaction.is_active(),
            canceled: self.compaction.was_canceled(),
        })
    }
}

impl std::fmt::Debug for DbShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbShared")
            .field("home", &self.home_path)
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn resolve_params(params: &[&str]) -> KvdbResult<(Params, DbConfig)> {
    let defaults = runtime::defaults()?;
    let params = defaults.merged(&Params::parse(params)?);
    let config = params.db_config()?;
    Ok((params, config))
}

/// Applies one commit, grouping ops by keyspace so each store is locked
/// once. Ops for unknown keyspaces are skipped.
fn apply_ops(stores: &HashMap<KeyspaceId, Arc<KeyspaceStore>>, seq: SequenceNumber, ops: &[WalOp]) {
    let mut by_kvs: BTreeMap<KeyspaceId, Vec<&WalOp>> = BTreeMap::new();
    for op in ops {
        by_kvs.entry(op.keyspace()).or_default().push(op);
    }
    for (id, ops) in by_kvs {
        if let Some(store) = stores.get(&id) {
            store.apply(seq, &ops);
        }
    }
}
