//! Data log records and their encoding.

use crate::error::{KvdbError, KvdbResult};
use crate::types::{KeyspaceId, SequenceNumber};

/// Magic bytes opening every record.
pub const WAL_MAGIC: [u8; 4] = *b"KVDL";

/// Current record format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type byte of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A committed batch of mutations.
    Commit = 1,
    /// Sequence high-water mark written at the head of a compacted log.
    Checkpoint = 2,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    /// Insert or overwrite a key.
    Put {
        /// Target keyspace.
        kvs: KeyspaceId,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Target keyspace.
        kvs: KeyspaceId,
        /// Key bytes.
        key: Vec<u8>,
    },
    /// Remove every key starting with `prefix`.
    PrefixDelete {
        /// Target keyspace.
        kvs: KeyspaceId,
        /// Key prefix.
        prefix: Vec<u8>,
    },
}

impl WalOp {
    const PUT: u8 = 1;
    const DELETE: u8 = 2;
    const PREFIX_DELETE: u8 = 3;

    /// Keyspace the op applies to.
    #[must_use]
    pub fn keyspace(&self) -> KeyspaceId {
        match self {
            Self::Put { kvs, .. } | Self::Delete { kvs, .. } | Self::PrefixDelete { kvs, .. } => {
                *kvs
            }
        }
    }
}

/// A data log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Mutations published atomically at `seq`.
    ///
    /// Prefix deletes are applied before the other ops of the same record.
    Commit {
        /// Commit sequence number.
        seq: SequenceNumber,
        /// The mutations.
        ops: Vec<WalOp>,
    },

    /// Lower bound for sequence numbers after replay.
    Checkpoint {
        /// Highest sequence number issued before the log was rewritten.
        seq: SequenceNumber,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Sequence number carried by the record.
    #[must_use]
    pub fn seq(&self) -> SequenceNumber {
        match self {
            Self::Commit { seq, .. } | Self::Checkpoint { seq } => *seq,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> KvdbResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Commit { seq, ops } => {
                buf.extend_from_slice(&seq.as_u64().to_le_bytes());
                put_len(&mut buf, ops.len())?;
                for op in ops {
                    match op {
                        WalOp::Put { kvs, key, value } => {
                            buf.push(WalOp::PUT);
                            buf.extend_from_slice(&kvs.as_u32().to_le_bytes());
                            put_bytes(&mut buf, key)?;
                            put_bytes(&mut buf, value)?;
                        }
                        WalOp::Delete { kvs, key } => {
                            buf.push(WalOp::DELETE);
                            buf.extend_from_slice(&kvs.as_u32().to_le_bytes());
                            put_bytes(&mut buf, key)?;
                        }
                        WalOp::PrefixDelete { kvs, prefix } => {
                            buf.push(WalOp::PREFIX_DELETE);
                            buf.extend_from_slice(&kvs.as_u32().to_le_bytes());
                            put_bytes(&mut buf, prefix)?;
                        }
                    }
                }
            }
            Self::Checkpoint { seq } => {
                buf.extend_from_slice(&seq.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Serializes the full record, envelope and checksum included.
    pub fn encode(&self) -> KvdbResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| KvdbError::invalid_argument("data log record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        // CRC32 over everything before it
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> KvdbResult<Self> {
        let mut dec = Decoder { payload, pos: 0 };
        let record = match record_type {
            WalRecordType::Commit => {
                let seq = SequenceNumber::new(dec.u64()?);
                let count = dec.u32()? as usize;
                // each op takes at least 9 bytes, so a bogus count cannot
                // trigger a huge allocation
                let mut ops = Vec::with_capacity(count.min(payload.len() / 9));
                for _ in 0..count {
                    let tag = dec.u8()?;
                    let kvs = KeyspaceId::new(dec.u32()?);
                    let op = match tag {
                        WalOp::PUT => WalOp::Put {
                            kvs,
                            key: dec.bytes()?,
                            value: dec.bytes()?,
                        },
                        WalOp::DELETE => WalOp::Delete {
                            kvs,
                            key: dec.bytes()?,
                        },
                        WalOp::PREFIX_DELETE => WalOp::PrefixDelete {
                            kvs,
                            prefix: dec.bytes()?,
                        },
                        other => {
                            return Err(KvdbError::corruption(format!(
                                "unknown op tag {other} in commit record"
                            )))
                        }
                    };
                    ops.push(op);
                }
                Self::Commit { seq, ops }
            }
            WalRecordType::Checkpoint => Self::Checkpoint {
                seq: SequenceNumber::new(dec.u64()?),
            },
        };

        if dec.pos != payload.len() {
            return Err(KvdbError::corruption(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                dec.pos,
                payload.len()
            )));
        }
        Ok(record)
    }
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> KvdbResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| KvdbError::invalid_argument("data log field too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> KvdbResult<()> {
    put_len(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Decoder<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn take(&mut self, n: usize) -> KvdbResult<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.payload.len())
            .ok_or_else(|| KvdbError::corruption("unexpected end of payload"))?;
        let slice = &self.payload[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> KvdbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> KvdbResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| KvdbError::corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> KvdbResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| KvdbError::corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn bytes(&mut self) -> KvdbResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
