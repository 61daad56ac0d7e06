//! Data log for durability and crash recovery.
//!
//! Every commit is appended as one record before it becomes visible, so a
//! commit is either fully in the log or not at all. On open the log is
//! replayed to rebuild the keyspaces.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! A record cut short at the end of the log (torn header or payload) is the
//! trace of a crash mid-append; replay stops there and the tail is
//! truncated. A checksum mismatch, bad magic, unknown record type or future
//! version is corruption and the database refuses to open.

mod reader;
mod record;
mod writer;

pub use reader::WalReader;
pub use record::{compute_crc32, WalOp, WalRecord, WalRecordType};
pub use writer::DataLog;
