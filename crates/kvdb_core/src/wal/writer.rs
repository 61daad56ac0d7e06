//! Appending and replaying the data log.

use crate::error::KvdbResult;
use crate::wal::reader::WalReader;
use crate::wal::record::WalRecord;
use kvdb_storage::StorageBackend;

/// The data log of one database.
///
/// Not internally synchronized: the database keeps it behind its commit
/// lock, which also orders records by sequence number.
pub struct DataLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl DataLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Appends a record, syncing it when durability is enabled.
    ///
    /// Returns the offset where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn append(&mut self, record: &WalRecord) -> KvdbResult<u64> {
        let data = record.encode()?;
        let offset = self.backend.append(&data)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(offset)
    }

    /// Reads back every intact record.
    ///
    /// A torn tail left by a crash mid-append is cut off so that later
    /// appends start on a record boundary.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for a damaged record, or an I/O error.
    pub fn replay(&mut self) -> KvdbResult<Vec<WalRecord>> {
        let data = self.backend.read_all()?;
        let mut reader = WalReader::new(&data);
        let records = reader
            .by_ref()
            .map(|item| item.map(|(_, record)| record))
            .collect::<KvdbResult<Vec<_>>>()?;

        let valid = reader.valid_len();
        if valid < data.len() as u64 {
            tracing::warn!(
                valid,
                size = data.len(),
                "truncating torn record at end of data log"
            );
            self.backend.truncate(valid)?;
        }
        Ok(records)
    }

    /// Replaces the whole log with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend swap fails; the previous
    /// log is then left in place.
    pub fn rewrite(&mut self, records: &[WalRecord]) -> KvdbResult<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&record.encode()?);
        }
        self.backend.replace(&data)?;
        Ok(())
    }

    /// Forces everything appended so far to stable storage.
    pub fn sync(&mut self) -> KvdbResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> KvdbResult<u64> {
        Ok(self.backend.size()?)
    }
}

impl std::fmt::Debug for DataLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyspaceId, SequenceNumber};
    use crate::wal::WalOp;
    use kvdb_storage::InMemoryBackend;

    fn commit(seq: u64) -> WalRecord {
        WalRecord::Commit {
            seq: SequenceNumber::new(seq),
            ops: vec![WalOp::Delete {
                kvs: KeyspaceId::new(0),
                key: seq.to_be_bytes().to_vec(),
            }],
        }
    }

    #[test]
    fn append_then_replay() {
        let mut log = DataLog::new(Box::new(InMemoryBackend::new()), true);
        assert_eq!(log.append(&commit(1)).unwrap(), 0);
        log.append(&commit(2)).unwrap();

        assert_eq!(log.replay().unwrap(), vec![commit(1), commit(2)]);
    }

    #[test]
    fn replay_truncates_torn_tail() {
        let mut image = commit(1).encode().unwrap();
        let intact = image.len() as u64;
        image.extend_from_slice(&commit(2).encode().unwrap()[..5]);

        let mut log = DataLog::new(Box::new(InMemoryBackend::with_data(image)), false);
        assert_eq!(log.replay().unwrap(), vec![commit(1)]);
        assert_eq!(log.size().unwrap(), intact);

        let offset = log.append(&commit(3)).unwrap();
        assert_eq!(offset, intact);
        assert_eq!(log.replay().unwrap(), vec![commit(1), commit(3)]);
    }

    #[test]
    fn rewrite_replaces_history() {
        let mut log = DataLog::new(Box::new(InMemoryBackend::new()), false);
        for seq in 1..=10 {
            log.append(&commit(seq)).unwrap();
        }
        let before = log.size().unwrap();

        let compacted = [WalRecord::Checkpoint {
            seq: SequenceNumber::new(10),
        }];
        log.rewrite(&compacted).unwrap();
        assert!(log.size().unwrap() < before);
        assert_eq!(log.replay().unwrap(), compacted.to_vec());
    }
}
