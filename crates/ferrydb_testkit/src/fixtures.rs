//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases on a
//! fresh [`LocalEngine`] and for common test scenarios.

use ferrydb_boundary::Engine;
use ferrydb_client::{Database, MutableDocument};
use ferrydb_engine::LocalEngine;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The engine the database was opened on.
    pub engine: Arc<dyn Engine>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates an in-memory test database named `test`.
    pub fn memory() -> Self {
        Self::memory_named("test")
    }

    /// Creates an in-memory test database with the given name.
    pub fn memory_named(name: &str) -> Self {
        let engine: Arc<dyn Engine> = Arc::new(LocalEngine::new());
        let db = Database::open(Arc::clone(&engine), name, None)
            .expect("failed to open in-memory database");
        Self {
            db,
            engine,
            temp_dir: None,
        }
    }

    /// Creates a directory-backed test database in a temp directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let engine: Arc<dyn Engine> = Arc::new(LocalEngine::new());
        let db = Database::open(Arc::clone(&engine), "test", Some(temp_dir.path()))
            .expect("failed to open file database");
        Self {
            db,
            engine,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the directory the database lives under, if file-based.
    pub fn directory(&self) -> Option<&std::path::Path> {
        self.temp_dir.as_ref().map(|dir| dir.path())
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh in-memory database.
pub fn with_memory_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Saves a JSON body under the given id, panicking on failure.
pub fn save_json(db: &Database, id: &str, body: &Value) -> MutableDocument {
    let doc = MutableDocument::with_id(db, id).expect("failed to create document");
    doc.set_value(body).expect("failed to set body");
    assert!(db.save_document(&doc).expect("failed to save document"));
    doc
}

/// Reads a document body back as a structured value.
pub fn read_json(db: &Database, id: &str) -> Option<Value> {
    db.get_document(id)
        .expect("failed to get document")
        .map(|doc| doc.to_value().expect("failed to decode body"))
}

/// Polls `condition` until it holds or the default timeout elapses.
pub fn wait_until(condition: impl FnMut() -> bool) -> bool {
    wait_until_for(condition, Duration::from_secs(5))
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_fixture_round_trips() {
        with_memory_db(|db| {
            save_json(db, "x", &json!({"a": 1}));
            assert_eq!(read_json(db, "x"), Some(json!({"a": 1})));
            assert_eq!(read_json(db, "missing"), None);
        });
    }

    #[test]
    fn file_fixture_is_persistent() {
        let test_db = TestDatabase::file();
        let directory = test_db.directory().unwrap().to_path_buf();
        save_json(&test_db, "x", &json!({"a": 1}));
        test_db.db.close().unwrap();

        let reopened = Database::open(Arc::clone(&test_db.engine), "test", Some(&directory))
            .unwrap();
        assert_eq!(read_json(&reopened, "x"), Some(json!({"a": 1})));
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until_for(|| false, Duration::from_millis(20)));
        assert!(wait_until(|| true));
    }
}
