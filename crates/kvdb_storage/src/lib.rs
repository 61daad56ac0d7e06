//! # kvdb storage
//!
//! Append-oriented byte stores used by `kvdb_core` for its data log.
//!
//! A backend knows nothing about records, keyspaces or transactions. It
//! hands out offsets for appended bytes, reads them back, makes them durable
//! on request and can atomically swap its whole content for a compacted
//! image.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral databases and tests
//! - [`FileBackend`] - a single file on the local file system
//!
//! ```rust
//! use kvdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let at = log.append(b"record").unwrap();
//! assert_eq!(log.read_at(at, 6).unwrap(), b"record");
//!
//! log.replace(b"compacted").unwrap();
//! assert_eq!(log.size().unwrap(), 9);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
