//! Record iteration over a loaded data log.

use crate::error::{KvdbError, KvdbResult};
use crate::wal::record::{
    compute_crc32, WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION,
};

/// Iterates over the records in a data log image.
///
/// Yields `(offset, record)` pairs. Iteration ends quietly at a torn
/// record; [`valid_len`](Self::valid_len) then tells where the intact
/// prefix of the log ends.
#[derive(Debug)]
pub struct WalReader<'a> {
    data: &'a [u8],
    offset: usize,
    finished: bool,
}

impl<'a> WalReader<'a> {
    /// Starts reading `data` from the beginning.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            finished: false,
        }
    }

    /// Length of the log up to the end of the last complete record read.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    fn read_next_record(&mut self) -> KvdbResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        let rest = &self.data[start..];

        if rest.len() < HEADER_SIZE {
            // torn header, treat as end of log
            return Ok(None);
        }
        let header = &rest[..HEADER_SIZE];

        if header[0..4] != WAL_MAGIC {
            return Err(KvdbError::corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(KvdbError::corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            KvdbError::corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            ))
        })?;

        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if rest.len() < total_len {
            // torn payload
            return Ok(None);
        }

        let payload_end = HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            rest[payload_end],
            rest[payload_end + 1],
            rest[payload_end + 2],
            rest[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&rest[..payload_end]);
        if stored_crc != computed_crc {
            return Err(KvdbError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = WalRecord::decode_payload(record_type, &rest[HEADER_SIZE..payload_end])?;
        self.offset += total_len;
        Ok(Some((start as u64, record)))
    }
}

impl Iterator for WalReader<'_> {
    type Item = KvdbResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
