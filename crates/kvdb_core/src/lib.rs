//! # kvdb core
//!
//! Embedded transactional key-value engine.
//!
//! This crate provides:
//! - Databases holding named, byte-ordered keyspaces
//! - Snapshot-isolated, reusable transactions
//! - Ordered cursors with free, snapshot and transaction-bound views
//! - A checksummed data log for durability and crash recovery
//! - Background compaction driven by space amplification
//! - Layered `kvdb.` / `kvs.` configuration parameters
//!
//! Call [`runtime::init`] (or hold a [`Runtime`] guard) before opening a
//! database.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod cursor;
mod database;
mod dir;
mod error;
mod keyspace;
mod limits;
mod manifest;
mod params;
pub mod runtime;
mod store;
mod throttle;
mod transaction;
mod types;
pub mod wal;

pub use compaction::{CompactRequest, CompactStatus};
pub use config::{DbConfig, KvsConfig, DEFAULT_HWM_PCT, DEFAULT_LWM_PCT};
pub use cursor::{Cursor, CursorBinding, CursorFlags};
pub use database::Database;
pub use error::{ErrorKind, KvdbError, KvdbResult};
pub use keyspace::{Keyspace, PutFlags};
pub use limits::{
    KVS_COUNT_MAX, KVS_KEY_LEN_MAX, KVS_NAME_LEN_MAX, KVS_PFX_LEN_MAX, KVS_VALUE_LEN_MAX,
};
pub use manifest::{KeyspaceEntry, Manifest};
pub use params::Params;
pub use runtime::Runtime;
pub use transaction::{Transaction, TransactionState};
pub use types::{KeyspaceId, SequenceNumber, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Major version component.
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");

/// Minor version component.
pub const VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");

/// Patch version component.
pub const VERSION_PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");
