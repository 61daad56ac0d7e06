//! Snapshot-isolated transactions.
//!
//! A [`Transaction`] is allocated once per database and cycled through
//! `begin`/`commit`/`abort` as often as needed:
//!
//! ```text
//! Invalid --begin--> Active --commit--> Committed
//!                      |                    |
//!                      +----abort--> Aborted|
//!                                      |    |
//!            Active <------begin-------+----+
//! ```
//!
//! Reads inside a transaction see the committed state as of `begin` plus
//! the transaction's own writes. Writes are buffered and published
//! atomically at commit under a single sequence number; prefix deletes are
//! applied before the transaction's puts and deletes. There is no
//! write-write conflict detection: of two transactions writing the same key,
//! the later commit wins.

mod handle;
mod state;

pub use handle::Transaction;
pub(crate) use handle::{BoundSlot, TxnCore};
pub use state::TransactionState;
pub(crate) use state::WriteLookup;
