//! Database home directory.
//!
//! ```text
//! <home>/
//! ├─ MANIFEST          # keyspace catalog (JSON)
//! ├─ LOCK              # advisory lock, one open handle per home
//! └─ data.log          # data log
//! ```

use crate::error::{KvdbError, KvdbResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const DATA_LOG_FILE: &str = "data.log";

/// An exclusively locked database home.
///
/// The lock is held for the lifetime of the value and released when the
/// lock file handle is closed on drop.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Creates a new database home with an empty manifest.
    ///
    /// The directory itself may already exist as long as it holds no
    /// database.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `path` already holds a database.
    pub fn create(path: &Path) -> KvdbResult<Self> {
        if path.join(MANIFEST_FILE).exists() {
            return Err(KvdbError::already_exists(format!(
                "database at {}",
                path.display()
            )));
        }
        fs::create_dir_all(path).map_err(|e| access_error(path, e))?;
        let dir = Self::lock(path)?;
        dir.save_manifest(&Manifest::new())?;
        Ok(dir)
    }

    /// Opens an existing database home.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no database at `path`,
    /// `PermissionDenied` if it cannot be accessed and `Busy` if another
    /// handle holds it open.
    pub fn open(path: &Path) -> KvdbResult<Self> {
        match fs::metadata(path.join(MANIFEST_FILE)) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(KvdbError::corruption(format!(
                    "{} is not a file",
                    path.join(MANIFEST_FILE).display()
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KvdbError::not_found(format!(
                    "database at {}",
                    path.display()
                )))
            }
            Err(e) => return Err(access_error(path, e)),
        }
        Self::lock(path)
    }

    /// Removes the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no database there and `Busy` while it
    /// is open.
    pub fn destroy(path: &Path) -> KvdbResult<()> {
        let dir = Self::open(path)?;
        for name in [DATA_LOG_FILE, MANIFEST_TEMP, MANIFEST_FILE] {
            match fs::remove_file(path.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        drop(dir);
        fs::remove_file(path.join(LOCK_FILE))?;
        // leave the directory if the caller put other files in it
        if let Err(e) = fs::remove_dir(path) {
            tracing::debug!(path = %path.display(), error = %e, "database home not removed");
        }
        Ok(())
    }

    fn lock(path: &Path) -> KvdbResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))
            .map_err(|e| access_error(path, e))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(KvdbError::busy(format!(
                "database at {} is open elsewhere",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the database home.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the data log.
    #[must_use]
    pub fn data_log_path(&self) -> PathBuf {
        self.path.join(DATA_LOG_FILE)
    }

    /// Path of the manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Loads the manifest.
    pub fn load_manifest(&self) -> KvdbResult<Manifest> {
        let data = fs::read(self.manifest_path()).map_err(|e| access_error(&self.path, e))?;
        Manifest::decode(&data)
    }

    /// Saves the manifest atomically.
    ///
    /// Writes a temporary file, syncs it, renames it over `MANIFEST` and
    /// then syncs the directory so the rename itself is durable.
    pub fn save_manifest(&self, manifest: &Manifest) -> KvdbResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);
        let data = manifest.encode()?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.manifest_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> KvdbResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    // NTFS journals metadata, there is no directory fsync
    #[cfg(not(unix))]
    fn sync_directory(&self) -> KvdbResult<()> {
        Ok(())
    }
}

fn access_error(path: &Path, e: io::Error) -> KvdbError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        KvdbError::PermissionDenied {
            path: path.to_path_buf(),
        }
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn create_then_open() {
        let temp = tempdir().unwrap();
        let home = temp.path().join("db");

        let dir = DatabaseDir::create(&home).unwrap();
        assert!(home.join("MANIFEST").exists());
        assert_eq!(dir.data_log_path(), home.join("data.log"));
        drop(dir);

        let dir = DatabaseDir::open(&home).unwrap();
        assert!(dir.load_manifest().unwrap().keyspaces.is_empty());
    }

    #[test]
    fn create_twice_fails() {
        let temp = tempdir().unwrap();
        drop(DatabaseDir::create(temp.path()).unwrap());
        let err = DatabaseDir::create(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn open_missing_is_not_found() {
        let temp = tempdir().unwrap();
        let err = DatabaseDir::open(&temp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // an existing but empty directory holds no database either
        let err = DatabaseDir::open(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _dir = DatabaseDir::create(temp.path()).unwrap();
        let err = DatabaseDir::open(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn manifest_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let dir = DatabaseDir::create(temp.path()).unwrap();
            let mut manifest = dir.load_manifest().unwrap();
            manifest.add_keyspace("users", 2).unwrap();
            dir.save_manifest(&manifest).unwrap();
        }

        let dir = DatabaseDir::open(temp.path()).unwrap();
        let manifest = dir.load_manifest().unwrap();
        assert_eq!(manifest.get("users").unwrap().prefix_length, 2);
        assert!(!temp.path().join("MANIFEST.tmp").exists());
    }

    #[test]
    fn destroy_removes_home() {
        let temp = tempdir().unwrap();
        let home = temp.path().join("db");
        drop(DatabaseDir::create(&home).unwrap());
        fs::write(home.join("data.log"), b"x").unwrap();

        DatabaseDir::destroy(&home).unwrap();
        assert!(!home.exists());
        assert_eq!(
            DatabaseDir::destroy(&home).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
