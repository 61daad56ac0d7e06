//! Single-file store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A [`StorageBackend`] over one file.
///
/// `flush` hands buffered bytes to the OS; `sync` calls `sync_all`.
/// [`replace`](StorageBackend::replace) writes a sibling `*.compact` file,
/// syncs it and renames it over the original.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, true)
    }

    /// Opens `path`, failing with `io::ErrorKind::NotFound` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, false)
    }

    fn open_with(path: &Path, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".compact");
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
            _ => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size;
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= size);
        if !in_bounds {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: self.size,
            });
        }
        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let staging = self.staging_path();
        {
            let mut out = File::create(&staging)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        self.sync_parent()?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *self.file.get_mut() = file;
        self.size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        let store = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.path(), path);
    }

    #[test]
    fn open_existing_reports_not_found() {
        let dir = tempdir().unwrap();
        let err = FileBackend::open_existing(&dir.path().join("missing.log")).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn content_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let mut store = FileBackend::open(&path).unwrap();
            store.append(b"first ").unwrap();
            store.append(b"second").unwrap();
            store.sync().unwrap();
        }

        let store = FileBackend::open_existing(&path).unwrap();
        assert_eq!(store.size().unwrap(), 12);
        assert_eq!(store.read_at(6, 6).unwrap(), b"second");
        assert!(matches!(
            store.read_at(10, 3),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn replace_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        {
            let mut store = FileBackend::open(&path).unwrap();
            store.append(b"a long history of overwritten values").unwrap();
            store.replace(b"live").unwrap();
            assert_eq!(store.append(b"+tail").unwrap(), 4);
            store.sync().unwrap();
        }

        let store = FileBackend::open_existing(&path).unwrap();
        assert_eq!(store.read_all().unwrap(), b"live+tail");
        assert!(!dir.path().join("data.log.compact").exists());
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        let mut store = FileBackend::open(&path).unwrap();
        store.append(b"0123456789").unwrap();
        store.truncate(4).unwrap();
        assert_eq!(store.read_all().unwrap(), b"0123");
        assert!(store.truncate(5).is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), 4);
    }
}
