//! Database directory management.
//!
//! File system layout for a persistent database:
//!
//! ```text
//! <directory>/<name>/
//! ├─ LOCK              # Advisory lock for exclusive access
//! └─ records.json      # Persisted document records
//! ```
//!
//! The LOCK file ensures only one handle can own the database at a time.
//! Records are rewritten atomically on every commit via a temporary file.

use crate::store::PersistedDatabase;
use ferrydb_boundary::{BoundaryError, BoundaryResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const RECORDS_FILE: &str = "records.json";
const RECORDS_TEMP: &str = "records.json.tmp";

/// Manages a database directory and its advisory lock.
///
/// Only one `DatabaseDir` instance can exist per directory at a time; the
/// lock is released when the instance is dropped.
#[derive(Debug)]
pub(crate) struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and acquires its lock.
    ///
    /// Fails with `OpenFailed` if the directory cannot be created and with
    /// `DatabaseLocked` if another handle holds the lock.
    pub fn open(path: &Path) -> BoundaryResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                BoundaryError::open_failed(format!(
                    "failed to create directory {}: {e}",
                    path.display()
                ))
            })?;
        }

        if !path.is_dir() {
            return Err(BoundaryError::open_failed(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                BoundaryError::open_failed(format!("failed to open lock file: {e}"))
            })?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(BoundaryError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the database directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads persisted records, or None for a fresh directory.
    pub fn load_records(&self) -> BoundaryResult<Option<PersistedDatabase>> {
        let records_path = self.path.join(RECORDS_FILE);
        if !records_path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&records_path)?;
        let records = serde_json::from_str(&text)
            .map_err(|e| BoundaryError::corrupt(format!("records file: {e}")))?;
        Ok(Some(records))
    }

    /// Persists records atomically (write to temp file, then rename).
    pub fn save_records(&self, records: &PersistedDatabase) -> BoundaryResult<()> {
        let text = serde_json::to_string(records)
            .map_err(|e| BoundaryError::corrupt(format!("records encode: {e}")))?;

        let temp_path = self.path.join(RECORDS_TEMP);
        fs::write(&temp_path, text)?;
        fs::rename(&temp_path, self.path.join(RECORDS_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db");
        assert!(!path.exists());

        let dir = DatabaseDir::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn second_open_fails_locked() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db");

        let _dir = DatabaseDir::open(&path).unwrap();
        let err = DatabaseDir::open(&path).unwrap_err();
        assert!(matches!(err, BoundaryError::DatabaseLocked));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db");

        let dir = DatabaseDir::open(&path).unwrap();
        drop(dir);
        let _dir = DatabaseDir::open(&path).unwrap();
    }

    #[test]
    fn open_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("occupied");
        fs::write(&file_path, b"not a directory").unwrap();

        let err = DatabaseDir::open(&file_path).unwrap_err();
        assert!(matches!(err, BoundaryError::OpenFailed { .. }));
    }

    #[test]
    fn records_round_trip() {
        let temp = TempDir::new().unwrap();
        let dir = DatabaseDir::open(temp.path()).unwrap();

        assert!(dir.load_records().unwrap().is_none());

        let records = PersistedDatabase {
            format_version: 1,
            next_sequence: 3,
            documents: BTreeMap::new(),
        };
        dir.save_records(&records).unwrap();

        let loaded = dir.load_records().unwrap().unwrap();
        assert_eq!(loaded.format_version, 1);
        assert_eq!(loaded.next_sequence, 3);
        assert!(loaded.documents.is_empty());
    }

    #[test]
    fn corrupt_records_surface_as_corrupt() {
        let temp = TempDir::new().unwrap();
        let dir = DatabaseDir::open(temp.path()).unwrap();
        fs::write(temp.path().join(RECORDS_FILE), b"{not json").unwrap();

        let err = dir.load_records().unwrap_err();
        assert!(matches!(err, BoundaryError::Corrupt { .. }));
    }
}
