//! The database handle and its lifecycle discipline.

use crate::document::{Document, MutableDocument};
use crate::error::{ClientError, ClientResult};
use crate::listener::{ListenerRegistration, ListenerRegistry};
use crate::query::Query;
use ferrydb_boundary::{
    DatabaseChangeSink, DatabaseHandle, DocumentChangeSink, Engine, QueryLanguage,
};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of a database handle. Closed and Deleted are both terminal;
/// they differ only in whether storage was removed.
enum Lifecycle {
    Open(DatabaseHandle),
    Closed,
    Deleted,
}

pub(crate) struct DatabaseInner {
    pub(crate) engine: Arc<dyn Engine>,
    name: String,
    lifecycle: RwLock<Lifecycle>,
    pub(crate) registry: ListenerRegistry,
    in_transaction: Mutex<bool>,
}

impl DatabaseInner {
    /// Returns the live handle, or a usage error mentioning `action`.
    pub(crate) fn require_open(&self, action: &str) -> ClientResult<DatabaseHandle> {
        match &*self.lifecycle.read() {
            Lifecycle::Open(handle) => Ok(handle.clone()),
            _ => Err(ClientError::invalid_state(format!(
                "cannot {action} a closed database"
            ))),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(&*self.lifecycle.read(), Lifecycle::Open(_))
    }
}

/// An open document database.
///
/// A `Database` owns exactly one live engine handle. [`close`] and
/// [`delete`] release it; both are terminal, and every operation on a
/// closed database fails with a usage error, including a second `close`.
/// Documents, queries, and replicators derived from a database hold a weak
/// back-reference: they become unusable once it closes, and never keep it
/// alive.
///
/// `Database` is cheaply cloneable; clones share the same underlying
/// handle and lifecycle.
///
/// [`close`]: Database::close
/// [`delete`]: Database::delete
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens or creates the named database on the given engine.
    ///
    /// With a directory the store is persistent; without one it lives in
    /// memory. Fails with a boundary error if the store cannot be created
    /// or is locked by another handle.
    pub fn open(
        engine: Arc<dyn Engine>,
        name: &str,
        directory: Option<&Path>,
    ) -> ClientResult<Self> {
        let handle = engine.open_database(name, directory)?;
        tracing::debug!(name, "database opened");
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                engine,
                name: name.to_string(),
                lifecycle: RwLock::new(Lifecycle::Open(handle)),
                registry: ListenerRegistry::new(),
                in_transaction: Mutex::new(false),
            }),
        })
    }

    /// Removes a named database's storage without opening it.
    ///
    /// Returns false if nothing existed at the location.
    pub fn delete_by_name(
        engine: &Arc<dyn Engine>,
        name: &str,
        directory: &Path,
    ) -> ClientResult<bool> {
        Ok(engine.delete_database_by_name(name, directory)?)
    }

    /// The logical name the database was opened under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The on-disk location, or None for an in-memory database.
    pub fn path(&self) -> ClientResult<Option<PathBuf>> {
        let handle = self.inner.require_open("read the path of")?;
        Ok(self.inner.engine.database_path(&handle)?)
    }

    /// Returns true while the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Closes the database.
    ///
    /// Cancels every listener registered through this database before the
    /// handle is released: once `close` returns, no further callback is
    /// observable. Calling `close` on a closed database is an error, not a
    /// no-op.
    pub fn close(&self) -> ClientResult<()> {
        let mut lifecycle = self.inner.lifecycle.write();
        let Lifecycle::Open(handle) = &*lifecycle else {
            return Err(ClientError::invalid_state(
                "cannot close a closed database",
            ));
        };
        self.inner.engine.close_database(handle)?;
        self.inner.registry.cancel_all();
        *lifecycle = Lifecycle::Closed;
        tracing::debug!(name = %self.inner.name, "database closed");
        Ok(())
    }

    /// Closes the database and removes its persisted storage. Terminal,
    /// with the same guard as [`close`](Database::close).
    pub fn delete(&self) -> ClientResult<()> {
        let mut lifecycle = self.inner.lifecycle.write();
        let Lifecycle::Open(handle) = &*lifecycle else {
            return Err(ClientError::invalid_state(
                "cannot delete a closed database",
            ));
        };
        self.inner.engine.delete_database(handle)?;
        self.inner.registry.cancel_all();
        *lifecycle = Lifecycle::Deleted;
        Ok(())
    }

    /// Fetches an immutable snapshot of a document.
    ///
    /// Returns None when no document with the id exists; a missing id is
    /// never an error.
    pub fn get_document(&self, id: &str) -> ClientResult<Option<Document>> {
        let handle = self.inner.require_open("get a document from")?;
        Ok(self.inner.engine.get_document(&handle, id)?.map(|doc| {
            Document::new(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.engine),
                doc,
                id.to_string(),
                true,
            )
        }))
    }

    /// Fetches an editable copy of a document, or None if the id does not
    /// exist.
    pub fn get_mutable_document(&self, id: &str) -> ClientResult<Option<MutableDocument>> {
        let handle = self.inner.require_open("get a document from")?;
        Ok(self
            .inner
            .engine
            .get_mutable_document(&handle, id)?
            .map(|doc| {
                MutableDocument::from_existing(
                    Arc::downgrade(&self.inner),
                    Arc::clone(&self.inner.engine),
                    doc,
                    id.to_string(),
                )
            }))
    }

    /// Commits a mutable document's buffered edits as one atomic write.
    ///
    /// Saving under an id that already exists overwrites the stored
    /// document; conflict handling beyond the returned success flag is the
    /// engine's concern. The draft is pushed across the boundary first, so
    /// malformed JSON set via `set_json` surfaces here as a boundary
    /// error, with the draft left intact.
    pub fn save_document(&self, document: &MutableDocument) -> ClientResult<bool> {
        let handle = self.inner.require_open("save a document to")?;
        document.guard("save")?;
        document.flush_draft()?;
        let saved = self.inner.engine.save_document(&handle, document.handle())?;
        if saved {
            document.mark_saved();
        }
        Ok(saved)
    }

    /// Deletes a document. The passed instance is invalidated on success;
    /// any later operation on it fails with a usage error.
    pub fn delete_document(&self, document: &Document) -> ClientResult<bool> {
        let handle = self.inner.require_open("delete a document from")?;
        document.guard("delete")?;
        let deleted = self.inner.engine.delete_document(&handle, document.handle())?;
        if deleted {
            document.invalidate();
        }
        Ok(deleted)
    }

    /// Compiles a query against this database.
    ///
    /// Fails with a boundary error carrying the engine's diagnostic when
    /// the text does not compile; the database stays open and usable.
    pub fn create_query(&self, language: QueryLanguage, text: &str) -> ClientResult<Query> {
        let handle = self.inner.require_open("create a query on")?;
        let query = self.inner.engine.create_query(&handle, language, text)?;
        Ok(Query::new(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.engine),
            query,
        ))
    }

    /// Registers a callback invoked with the ids changed by each commit.
    ///
    /// Registration does not keep the database open; closing it ends the
    /// subscription.
    pub fn add_change_listener(
        &self,
        handler: impl Fn(Vec<String>) + Send + Sync + 'static,
    ) -> ClientResult<ListenerRegistration> {
        let handle = self.inner.require_open("listen to changes on")?;
        let engine = Arc::clone(&self.inner.engine);
        self.inner
            .registry
            .register(Arc::clone(&self.inner.engine), move |record| {
                let record = Arc::clone(record);
                let sink: DatabaseChangeSink = Box::new(move |ids| {
                    if !record.is_cancelled() {
                        handler(ids);
                    }
                });
                engine.add_database_listener(&handle, sink)
            })
    }

    /// Registers a callback invoked when one specific document changes.
    pub fn add_document_change_listener(
        &self,
        doc_id: &str,
        handler: impl Fn(String) + Send + Sync + 'static,
    ) -> ClientResult<ListenerRegistration> {
        let handle = self
            .inner
            .require_open("listen to document changes on")?;
        let engine = Arc::clone(&self.inner.engine);
        let doc_id = doc_id.to_string();
        self.inner
            .registry
            .register(Arc::clone(&self.inner.engine), move |record| {
                let record = Arc::clone(record);
                let sink: DocumentChangeSink = Box::new(move |id| {
                    if !record.is_cancelled() {
                        handler(id);
                    }
                });
                engine.add_document_listener(&handle, &doc_id, sink)
            })
    }

    /// Begins a transaction bracketing a batch of writes.
    ///
    /// Nested transactions are not supported: a second begin before the
    /// matching end is a usage error.
    pub fn begin_transaction(&self) -> ClientResult<()> {
        let handle = self.inner.require_open("begin a transaction on")?;
        let mut in_transaction = self.inner.in_transaction.lock();
        if *in_transaction {
            return Err(ClientError::invalid_state(
                "a transaction is already in progress",
            ));
        }
        self.inner.engine.begin_transaction(&handle)?;
        *in_transaction = true;
        Ok(())
    }

    /// Ends the open transaction, committing or discarding its writes.
    pub fn end_transaction(&self, commit: bool) -> ClientResult<()> {
        let handle = self.inner.require_open("end a transaction on")?;
        let mut in_transaction = self.inner.in_transaction.lock();
        if !*in_transaction {
            return Err(ClientError::invalid_state("no transaction is in progress"));
        }
        self.inner.engine.end_transaction(&handle, commit)?;
        *in_transaction = false;
        Ok(())
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        *self.inner.in_transaction.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrydb_engine::LocalEngine;

    fn open() -> Database {
        Database::open(Arc::new(LocalEngine::new()), "db1", None).unwrap()
    }

    #[test]
    fn close_is_terminal() {
        let db = open();
        assert!(db.is_open());

        db.close().unwrap();
        assert!(!db.is_open());

        let err = db.close().unwrap_err();
        assert!(err.is_invalid_state());
        assert!(err.to_string().contains("cannot close a closed database"));
    }

    #[test]
    fn every_operation_fails_after_close() {
        let db = open();
        db.close().unwrap();

        assert!(db.get_document("x").unwrap_err().is_invalid_state());
        assert!(db.get_mutable_document("x").unwrap_err().is_invalid_state());
        assert!(db.path().unwrap_err().is_invalid_state());
        assert!(db
            .add_change_listener(|_| {})
            .unwrap_err()
            .is_invalid_state());
        assert!(db
            .add_document_change_listener("x", |_| {})
            .unwrap_err()
            .is_invalid_state());
        assert!(db.begin_transaction().unwrap_err().is_invalid_state());
        assert!(db
            .create_query(QueryLanguage::Sql, "SELECT * FROM docs")
            .unwrap_err()
            .is_invalid_state());
        assert!(db.delete().unwrap_err().is_invalid_state());
    }

    #[test]
    fn clones_share_lifecycle() {
        let db = open();
        let clone = db.clone();
        db.close().unwrap();
        assert!(!clone.is_open());
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let db = open();
        db.begin_transaction().unwrap();
        assert!(db.in_transaction());

        let err = db.begin_transaction().unwrap_err();
        assert!(err.is_invalid_state());

        db.end_transaction(false).unwrap();
        assert!(!db.in_transaction());

        let err = db.end_transaction(true).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn name_survives_close() {
        let db = open();
        db.close().unwrap();
        assert_eq!(db.name(), "db1");
    }
}
