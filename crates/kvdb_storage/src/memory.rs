//! Heap-backed store for in-memory databases.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A [`StorageBackend`] holding its bytes in a `Vec`.
///
/// `flush` and `sync` are no-ops: nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store preloaded with `bytes`, e.g. to replay a captured log.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Copies out the current content.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).ok().filter(|&s| s <= bytes.len());
        let range = start.and_then(|s| s.checked_add(len).map(|e| s..e));

        match range {
            Some(r) if r.end <= bytes.len() => Ok(bytes[r].to_vec()),
            _ => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, so it fits in usize
        bytes.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        *self.bytes.write() = data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_appends() {
        let mut store = InMemoryBackend::new();
        assert_eq!(store.append(b"abc").unwrap(), 0);
        assert_eq!(store.append(b"").unwrap(), 3);
        assert_eq!(store.append(b"de").unwrap(), 3);
        assert_eq!(store.size().unwrap(), 5);
        assert_eq!(store.read_at(1, 3).unwrap(), b"bcd");
    }

    #[test]
    fn reads_outside_the_store_fail() {
        let mut store = InMemoryBackend::new();
        store.append(b"abc").unwrap();

        assert!(matches!(
            store.read_at(4, 1),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            store.read_at(2, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(store.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut store = InMemoryBackend::with_data(b"abcdef".to_vec());
        store.truncate(2).unwrap();
        assert_eq!(store.snapshot(), b"ab");
        assert!(matches!(
            store.truncate(10),
            Err(StorageError::InvalidTruncate { requested: 10, size: 2 })
        ));
    }

    #[test]
    fn replace_swaps_content() {
        let mut store = InMemoryBackend::with_data(b"old log".to_vec());
        store.replace(b"new").unwrap();
        assert_eq!(store.read_all().unwrap(), b"new");
        assert_eq!(store.append(b"!").unwrap(), 3);
    }
}
