//! The engine trait: the narrow synchronous call surface.

use crate::error::BoundaryResult;
use crate::handle::{
    DatabaseHandle, DocumentHandle, ListenerToken, QueryHandle, ReplicatorHandle,
};
use crate::replicator::{ReplicatorConfig, ReplicatorStatus};
use std::path::{Path, PathBuf};

/// Callback invoked with the ids of documents changed by one commit.
pub type DatabaseChangeSink = Box<dyn Fn(Vec<String>) + Send + Sync>;

/// Callback invoked with the id of one changed document.
pub type DocumentChangeSink = Box<dyn Fn(String) + Send + Sync>;

/// Callback invoked with a fresh JSON-encoded result set.
pub type QueryChangeSink = Box<dyn Fn(String) + Send + Sync>;

/// The query languages understood across the boundary.
///
/// An enumerated tag, never free text: callers select one of the two
/// supported languages, and the engine rejects source text that does not
/// compile under the selected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLanguage {
    /// Structured-object form: the query is itself a JSON object.
    Json,
    /// SQL-like textual form.
    Sql,
}

/// The synchronous call surface of a storage/replication engine.
///
/// Every call may fail with a [`crate::BoundaryError`]; none of them block
/// on network or replication progress (`replicator_start`/`stop` submit a
/// request and return). Change-listener sinks are the only asynchronous
/// part: an engine invokes them on an unspecified delivery context, in
/// commit order for any one handle, with no ordering across handles.
///
/// Engines are shared behind `Arc<dyn Engine>`; all methods take `&self`.
pub trait Engine: Send + Sync {
    // Database lifecycle

    /// Opens or creates the named database.
    ///
    /// With a directory, the store is persistent and exclusively locked;
    /// without one, the database lives in memory. Fails if the store
    /// cannot be created or another handle holds the lock.
    fn open_database(
        &self,
        name: &str,
        directory: Option<&Path>,
    ) -> BoundaryResult<DatabaseHandle>;

    /// Closes an open database, releasing its lock and listeners.
    ///
    /// After this returns, no listener registered against the database is
    /// invoked again.
    fn close_database(&self, db: &DatabaseHandle) -> BoundaryResult<()>;

    /// Closes an open database and removes its persisted storage.
    fn delete_database(&self, db: &DatabaseHandle) -> BoundaryResult<()>;

    /// Removes a named database's storage without opening it.
    ///
    /// Returns false if nothing existed at the location.
    fn delete_database_by_name(&self, name: &str, directory: &Path) -> BoundaryResult<bool>;

    /// Returns the logical name the database was opened under.
    fn database_name(&self, db: &DatabaseHandle) -> BoundaryResult<String>;

    /// Returns the on-disk location, or None for an in-memory database.
    fn database_path(&self, db: &DatabaseHandle) -> BoundaryResult<Option<PathBuf>>;

    // Transactions

    /// Begins a transaction grouping subsequent writes into one atomic
    /// unit. A second begin before the matching end is an error.
    fn begin_transaction(&self, db: &DatabaseHandle) -> BoundaryResult<()>;

    /// Ends the open transaction, committing or discarding its writes.
    fn end_transaction(&self, db: &DatabaseHandle, commit: bool) -> BoundaryResult<()>;

    // Documents

    /// Fetches an immutable snapshot of a document, or None if the id does
    /// not exist.
    fn get_document(
        &self,
        db: &DatabaseHandle,
        id: &str,
    ) -> BoundaryResult<Option<DocumentHandle>>;

    /// Fetches an editable copy of a document, or None if the id does not
    /// exist.
    fn get_mutable_document(
        &self,
        db: &DatabaseHandle,
        id: &str,
    ) -> BoundaryResult<Option<DocumentHandle>>;

    /// Stages a new editable document, assigning a fresh id when none is
    /// given. Nothing is persisted until `save_document`.
    fn create_document(&self, id: Option<&str>) -> BoundaryResult<DocumentHandle>;

    /// Returns a document's id.
    fn document_id(&self, doc: &DocumentHandle) -> BoundaryResult<String>;

    /// Encodes a document's body as JSON text.
    fn document_to_json(&self, doc: &DocumentHandle) -> BoundaryResult<String>;

    /// Decodes JSON text into an editable document's body, replacing it.
    ///
    /// Fails with `InvalidJson` on malformed text and `InvalidOperation`
    /// on an immutable snapshot.
    fn document_set_json(&self, doc: &DocumentHandle, json: &str) -> BoundaryResult<()>;

    /// Commits an editable document's body as one atomic write.
    ///
    /// Returns whether the engine accepted the write.
    fn save_document(&self, db: &DatabaseHandle, doc: &DocumentHandle) -> BoundaryResult<bool>;

    /// Deletes the document the handle refers to.
    ///
    /// Returns false if the id was not present.
    fn delete_document(&self, db: &DatabaseHandle, doc: &DocumentHandle)
        -> BoundaryResult<bool>;

    /// Releases a document handle's engine-side state.
    ///
    /// Safe to call for handles the engine no longer knows.
    fn release_document(&self, doc: &DocumentHandle);

    // Change listeners

    /// Registers a database-level change listener.
    fn add_database_listener(
        &self,
        db: &DatabaseHandle,
        sink: DatabaseChangeSink,
    ) -> BoundaryResult<ListenerToken>;

    /// Registers a listener for changes to one document id.
    fn add_document_listener(
        &self,
        db: &DatabaseHandle,
        doc_id: &str,
        sink: DocumentChangeSink,
    ) -> BoundaryResult<ListenerToken>;

    /// Registers a live-query listener.
    ///
    /// The engine delivers the current result set on registration and a
    /// fresh one whenever data the query depends on changes.
    fn add_query_listener(
        &self,
        query: &QueryHandle,
        sink: QueryChangeSink,
    ) -> BoundaryResult<ListenerToken>;

    /// Unregisters a listener. After this returns, the engine starts no
    /// new delivery for the token; a delivery already dispatched may still
    /// complete.
    fn remove_listener(&self, token: &ListenerToken) -> BoundaryResult<()>;

    // Queries

    /// Compiles query source text in the selected language against a
    /// database. Fails with `QueryCompile` carrying the diagnostic.
    fn create_query(
        &self,
        db: &DatabaseHandle,
        language: QueryLanguage,
        text: &str,
    ) -> BoundaryResult<QueryHandle>;

    /// Runs the query against current state; returns a JSON array of rows.
    fn query_execute(&self, query: &QueryHandle) -> BoundaryResult<String>;

    /// Returns a human-readable description of the query plan.
    fn query_explain(&self, query: &QueryHandle) -> BoundaryResult<String>;

    /// Returns the full parameter set as one JSON object.
    fn query_parameters(&self, query: &QueryHandle) -> BoundaryResult<String>;

    /// Replaces the full parameter set. Does not re-compile the query.
    fn query_set_parameters(
        &self,
        query: &QueryHandle,
        parameters_json: &str,
    ) -> BoundaryResult<()>;

    // Replicators

    /// Creates a replicator from a configuration captured at this moment.
    fn create_replicator(&self, config: ReplicatorConfig) -> BoundaryResult<ReplicatorHandle>;

    /// Returns the configuration the replicator was created with.
    fn replicator_config(
        &self,
        replicator: &ReplicatorHandle,
    ) -> BoundaryResult<ReplicatorConfig>;

    /// Requests that the replicator start.
    ///
    /// `reset_checkpoint` discards recorded sync progress, forcing a full
    /// re-sync. Starting an already-active replicator is a no-op.
    fn replicator_start(
        &self,
        replicator: &ReplicatorHandle,
        reset_checkpoint: bool,
    ) -> BoundaryResult<()>;

    /// Requests that the replicator stop. Asynchronous: observe the status
    /// until it reports `Stopped`.
    fn replicator_stop(&self, replicator: &ReplicatorHandle) -> BoundaryResult<()>;

    /// Returns a point-in-time status snapshot.
    fn replicator_status(
        &self,
        replicator: &ReplicatorHandle,
    ) -> BoundaryResult<ReplicatorStatus>;
}
