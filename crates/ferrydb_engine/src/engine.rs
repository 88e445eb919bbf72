//! The local engine: an in-process implementation of the boundary trait.

use crate::dir::DatabaseDir;
use crate::dispatch::Dispatcher;
use crate::query::{execute_plan, explain_plan, QueryPlan};
use crate::replicator::{Checkpoint, ReplicatorState};
use crate::store::{DbShard, PendingWrite};
use ferrydb_boundary::{
    BoundaryError, BoundaryResult, DatabaseChangeSink, DatabaseHandle, DocumentChangeSink,
    DocumentHandle, Engine, ListenerToken, QueryChangeSink, QueryHandle, QueryLanguage,
    ReplicatorActivity, ReplicatorConfig, ReplicatorHandle, ReplicatorProgress, ReplicatorStatus,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use uuid::Uuid;

/// A staged document instance: a mutable draft or an immutable snapshot.
struct StagedDocument {
    id: String,
    body: Value,
    mutable: bool,
}

/// A compiled query bound to one database.
pub(crate) struct QueryState {
    pub db: DatabaseHandle,
    pub plan: QueryPlan,
    pub parameters: RwLock<Map<String, Value>>,
    /// Last result set delivered to live-query listeners.
    pub last_delivered: Mutex<Option<String>>,
}

/// One registered listener.
pub(crate) struct ListenerEntry {
    /// Checked immediately before every delivery.
    pub removed: AtomicBool,
    pub sink: ListenerSink,
}

pub(crate) enum ListenerSink {
    Database {
        db: DatabaseHandle,
        sink: DatabaseChangeSink,
    },
    Document {
        db: DatabaseHandle,
        doc_id: String,
        sink: DocumentChangeSink,
    },
    Query {
        db: DatabaseHandle,
        query: QueryHandle,
        sink: QueryChangeSink,
    },
}

/// State shared between the engine facade, the notifier thread, and
/// replicator threads.
pub(crate) struct EngineShared {
    pub databases: RwLock<HashMap<DatabaseHandle, Arc<DbShard>>>,
    staged: RwLock<HashMap<DocumentHandle, StagedDocument>>,
    pub queries: RwLock<HashMap<QueryHandle, Arc<QueryState>>>,
    pub listeners: RwLock<HashMap<ListenerToken, Arc<ListenerEntry>>>,
    pub replicators: RwLock<HashMap<ReplicatorHandle, Arc<ReplicatorState>>>,
    pub dispatcher: Dispatcher,
}

/// An in-process storage and replication engine.
///
/// `LocalEngine` keeps every open database in one process: documents live
/// in memory, optionally mirrored to a locked directory, and replication
/// runs between databases opened in the same engine. It exists so the
/// object model has a complete, observable engine to run against; the
/// client layer only ever sees it as an `Arc<dyn Engine>`.
pub struct LocalEngine {
    shared: Arc<EngineShared>,
}

impl LocalEngine {
    /// Creates an engine with no open databases.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared {
                databases: RwLock::new(HashMap::new()),
                staged: RwLock::new(HashMap::new()),
                queries: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                replicators: RwLock::new(HashMap::new()),
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    fn shard(&self, db: &DatabaseHandle) -> BoundaryResult<Arc<DbShard>> {
        self.shared
            .databases
            .read()
            .get(db)
            .cloned()
            .ok_or_else(|| BoundaryError::no_such_handle("database"))
    }

    fn query_state(&self, query: &QueryHandle) -> BoundaryResult<Arc<QueryState>> {
        self.shared
            .queries
            .read()
            .get(query)
            .cloned()
            .ok_or_else(|| BoundaryError::no_such_handle("query"))
    }

    fn replicator_state(
        &self,
        replicator: &ReplicatorHandle,
    ) -> BoundaryResult<Arc<ReplicatorState>> {
        self.shared
            .replicators
            .read()
            .get(replicator)
            .cloned()
            .ok_or_else(|| BoundaryError::no_such_handle("replicator"))
    }

    /// Unregisters everything attached to a database that is going away.
    fn detach_database(&self, db: &DatabaseHandle) {
        {
            let mut listeners = self.shared.listeners.write();
            listeners.retain(|_, entry| {
                let owner = match &entry.sink {
                    ListenerSink::Database { db, .. } => db,
                    ListenerSink::Document { db, .. } => db,
                    ListenerSink::Query { db, .. } => db,
                };
                if owner == db {
                    entry.removed.store(true, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            });
        }
        self.shared
            .queries
            .write()
            .retain(|_, state| state.db != *db);

        // Replicators bound to the database notice its absence themselves;
        // wake them so they notice promptly.
        for state in self.shared.replicators.read().values() {
            if state.watches(db) {
                state.wake.notify();
            }
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        for state in self.shared.replicators.read().values() {
            state.stop_requested.store(true, Ordering::SeqCst);
            state.wake.notify();
        }
        self.shared.dispatcher.shutdown();
    }
}

/// Commits a write outside any transaction, or buffers it into the open
/// one. Buffered writes notify when the transaction commits.
fn write_through(
    shared: &Arc<EngineShared>,
    shard: &Arc<DbShard>,
    write: PendingWrite,
) -> BoundaryResult<()> {
    {
        let mut txn = shard.txn.lock();
        if let Some(buffer) = txn.as_mut() {
            buffer.push(write);
            return Ok(());
        }
    }
    let changed = shard.commit(vec![write])?;
    notify_commit(shared, &shard.handle, &changed);
    Ok(())
}

/// Commits writes and fans out change notifications. Used by the write
/// path and by replicator threads applying remote revisions.
pub(crate) fn commit_and_notify(
    shared: &Arc<EngineShared>,
    shard: &Arc<DbShard>,
    writes: Vec<PendingWrite>,
) -> BoundaryResult<()> {
    let changed = shard.commit(writes)?;
    notify_commit(shared, &shard.handle, &changed);
    Ok(())
}

/// Fans one commit out to listeners, live queries, and replicators.
fn notify_commit(shared: &Arc<EngineShared>, db: &DatabaseHandle, changed: &[String]) {
    if changed.is_empty() {
        return;
    }

    let mut touched_queries: Vec<QueryHandle> = Vec::new();
    {
        let listeners = shared.listeners.read();
        for entry in listeners.values() {
            match &entry.sink {
                ListenerSink::Database { db: owner, .. } if owner == db => {
                    let entry = Arc::clone(entry);
                    let ids = changed.to_vec();
                    shared.dispatcher.enqueue(Box::new(move || {
                        if !entry.removed.load(Ordering::SeqCst) {
                            if let ListenerSink::Database { sink, .. } = &entry.sink {
                                sink(ids);
                            }
                        }
                    }));
                }
                ListenerSink::Document { db: owner, doc_id, .. }
                    if owner == db && changed.iter().any(|id| id == doc_id) =>
                {
                    let entry = Arc::clone(entry);
                    let id = doc_id.clone();
                    shared.dispatcher.enqueue(Box::new(move || {
                        if !entry.removed.load(Ordering::SeqCst) {
                            if let ListenerSink::Document { sink, .. } = &entry.sink {
                                sink(id);
                            }
                        }
                    }));
                }
                ListenerSink::Query { db: owner, query, .. } if owner == db => {
                    if !touched_queries.contains(query) {
                        touched_queries.push(query.clone());
                    }
                }
                _ => {}
            }
        }
    }

    for query in touched_queries {
        let weak = Arc::downgrade(shared);
        shared
            .dispatcher
            .enqueue(Box::new(move || refresh_query(&weak, &query)));
    }

    for state in shared.replicators.read().values() {
        if state.running.load(Ordering::SeqCst) && state.watches(db) {
            state.wake.notify();
        }
    }
}

/// Re-executes a live query and delivers the result set to its listeners
/// when it differs from the last delivery. Runs on the notifier thread.
fn refresh_query(shared: &Weak<EngineShared>, query: &QueryHandle) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let Some(state) = shared.queries.read().get(query).cloned() else {
        return;
    };
    let Some(shard) = shared.databases.read().get(&state.db).cloned() else {
        return;
    };

    let parameters = state.parameters.read().clone();
    let Ok(result) = execute_plan(&state.plan, &parameters, &shard.snapshot()) else {
        return;
    };

    {
        let mut last = state.last_delivered.lock();
        if last.as_deref() == Some(result.as_str()) {
            return;
        }
        *last = Some(result.clone());
    }

    let entries: Vec<Arc<ListenerEntry>> = shared
        .listeners
        .read()
        .values()
        .filter(|entry| {
            matches!(&entry.sink, ListenerSink::Query { query: q, .. } if q == query)
        })
        .cloned()
        .collect();

    for entry in entries {
        if !entry.removed.load(Ordering::SeqCst) {
            if let ListenerSink::Query { sink, .. } = &entry.sink {
                sink(result.clone());
            }
        }
    }
}

/// Delivers the current result set to one newly registered listener.
fn deliver_initial_result(
    shared: &Weak<EngineShared>,
    query: &QueryHandle,
    entry: &Arc<ListenerEntry>,
) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let Some(state) = shared.queries.read().get(query).cloned() else {
        return;
    };
    let Some(shard) = shared.databases.read().get(&state.db).cloned() else {
        return;
    };

    let parameters = state.parameters.read().clone();
    let Ok(result) = execute_plan(&state.plan, &parameters, &shard.snapshot()) else {
        return;
    };

    *state.last_delivered.lock() = Some(result.clone());

    if !entry.removed.load(Ordering::SeqCst) {
        if let ListenerSink::Query { sink, .. } = &entry.sink {
            sink(result);
        }
    }
}

impl Engine for LocalEngine {
    fn open_database(
        &self,
        name: &str,
        directory: Option<&Path>,
    ) -> BoundaryResult<DatabaseHandle> {
        let dir = match directory {
            Some(directory) => Some(DatabaseDir::open(&directory.join(name))?),
            None => None,
        };

        let handle = DatabaseHandle::mint();
        let shard = Arc::new(DbShard::open(handle.clone(), name.to_string(), dir)?);
        self.shared
            .databases
            .write()
            .insert(handle.clone(), shard);
        tracing::debug!(name, persistent = directory.is_some(), "opened database");
        Ok(handle)
    }

    fn close_database(&self, db: &DatabaseHandle) -> BoundaryResult<()> {
        let shard = self
            .shared
            .databases
            .write()
            .remove(db)
            .ok_or_else(|| BoundaryError::no_such_handle("database"))?;
        self.detach_database(db);
        tracing::debug!(name = %shard.name, "closed database");
        Ok(())
    }

    fn delete_database(&self, db: &DatabaseHandle) -> BoundaryResult<()> {
        let shard = self
            .shared
            .databases
            .write()
            .remove(db)
            .ok_or_else(|| BoundaryError::no_such_handle("database"))?;
        self.detach_database(db);
        if let Some(dir) = &shard.dir {
            fs::remove_dir_all(dir.path())?;
        }
        tracing::debug!(name = %shard.name, "deleted database");
        Ok(())
    }

    fn delete_database_by_name(&self, name: &str, directory: &Path) -> BoundaryResult<bool> {
        let path = directory.join(name);
        {
            let databases = self.shared.databases.read();
            let open = databases
                .values()
                .any(|shard| shard.dir.as_ref().is_some_and(|dir| dir.path() == path));
            if open {
                return Err(BoundaryError::DatabaseLocked);
            }
        }
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&path)?;
        Ok(true)
    }

    fn database_name(&self, db: &DatabaseHandle) -> BoundaryResult<String> {
        Ok(self.shard(db)?.name.clone())
    }

    fn database_path(&self, db: &DatabaseHandle) -> BoundaryResult<Option<PathBuf>> {
        Ok(self
            .shard(db)?
            .dir
            .as_ref()
            .map(|dir| dir.path().to_path_buf()))
    }

    fn begin_transaction(&self, db: &DatabaseHandle) -> BoundaryResult<()> {
        let shard = self.shard(db)?;
        let mut txn = shard.txn.lock();
        if txn.is_some() {
            return Err(BoundaryError::invalid_operation(
                "transaction already in progress",
            ));
        }
        *txn = Some(Vec::new());
        Ok(())
    }

    fn end_transaction(&self, db: &DatabaseHandle, commit: bool) -> BoundaryResult<()> {
        let shard = self.shard(db)?;
        let writes = shard
            .txn
            .lock()
            .take()
            .ok_or_else(|| BoundaryError::invalid_operation("no transaction in progress"))?;
        if commit && !writes.is_empty() {
            commit_and_notify(&self.shared, &shard, writes)?;
        }
        Ok(())
    }

    fn get_document(
        &self,
        db: &DatabaseHandle,
        id: &str,
    ) -> BoundaryResult<Option<DocumentHandle>> {
        let shard = self.shard(db)?;
        Ok(shard.get(id).map(|body| {
            let handle = DocumentHandle::mint();
            self.shared.staged.write().insert(
                handle.clone(),
                StagedDocument {
                    id: id.to_string(),
                    body,
                    mutable: false,
                },
            );
            handle
        }))
    }

    fn get_mutable_document(
        &self,
        db: &DatabaseHandle,
        id: &str,
    ) -> BoundaryResult<Option<DocumentHandle>> {
        let shard = self.shard(db)?;
        Ok(shard.get(id).map(|body| {
            let handle = DocumentHandle::mint();
            self.shared.staged.write().insert(
                handle.clone(),
                StagedDocument {
                    id: id.to_string(),
                    body,
                    mutable: true,
                },
            );
            handle
        }))
    }

    fn create_document(&self, id: Option<&str>) -> BoundaryResult<DocumentHandle> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let handle = DocumentHandle::mint();
        self.shared.staged.write().insert(
            handle.clone(),
            StagedDocument {
                id,
                body: Value::Object(Map::new()),
                mutable: true,
            },
        );
        Ok(handle)
    }

    fn document_id(&self, doc: &DocumentHandle) -> BoundaryResult<String> {
        self.shared
            .staged
            .read()
            .get(doc)
            .map(|staged| staged.id.clone())
            .ok_or_else(|| BoundaryError::no_such_handle("document"))
    }

    fn document_to_json(&self, doc: &DocumentHandle) -> BoundaryResult<String> {
        let staged = self.shared.staged.read();
        let staged = staged
            .get(doc)
            .ok_or_else(|| BoundaryError::no_such_handle("document"))?;
        serde_json::to_string(&staged.body)
            .map_err(|e| BoundaryError::invalid_json(e.to_string()))
    }

    fn document_set_json(&self, doc: &DocumentHandle, json: &str) -> BoundaryResult<()> {
        let mut staged = self.shared.staged.write();
        let staged = staged
            .get_mut(doc)
            .ok_or_else(|| BoundaryError::no_such_handle("document"))?;
        if !staged.mutable {
            return Err(BoundaryError::invalid_operation(
                "document handle is immutable",
            ));
        }
        let body: Value =
            serde_json::from_str(json).map_err(|e| BoundaryError::invalid_json(e.to_string()))?;
        if !body.is_object() {
            return Err(BoundaryError::invalid_json(
                "document body must be a JSON object",
            ));
        }
        staged.body = body;
        Ok(())
    }

    fn save_document(&self, db: &DatabaseHandle, doc: &DocumentHandle) -> BoundaryResult<bool> {
        let shard = self.shard(db)?;
        let write = {
            let staged = self.shared.staged.read();
            let staged = staged
                .get(doc)
                .ok_or_else(|| BoundaryError::no_such_handle("document"))?;
            if !staged.mutable {
                return Err(BoundaryError::invalid_operation(
                    "cannot save an immutable document snapshot",
                ));
            }
            PendingWrite {
                id: staged.id.clone(),
                body: Some(staged.body.clone()),
            }
        };
        write_through(&self.shared, &shard, write)?;
        Ok(true)
    }

    fn delete_document(
        &self,
        db: &DatabaseHandle,
        doc: &DocumentHandle,
    ) -> BoundaryResult<bool> {
        let shard = self.shard(db)?;
        let id = self.document_id(doc)?;
        if !shard.contains(&id) {
            return Ok(false);
        }
        write_through(&self.shared, &shard, PendingWrite { id, body: None })?;
        Ok(true)
    }

    fn release_document(&self, doc: &DocumentHandle) {
        self.shared.staged.write().remove(doc);
    }

    fn add_database_listener(
        &self,
        db: &DatabaseHandle,
        sink: DatabaseChangeSink,
    ) -> BoundaryResult<ListenerToken> {
        self.shard(db)?;
        let token = ListenerToken::mint();
        let entry = Arc::new(ListenerEntry {
            removed: AtomicBool::new(false),
            sink: ListenerSink::Database {
                db: db.clone(),
                sink,
            },
        });
        self.shared.listeners.write().insert(token.clone(), entry);
        Ok(token)
    }

    fn add_document_listener(
        &self,
        db: &DatabaseHandle,
        doc_id: &str,
        sink: DocumentChangeSink,
    ) -> BoundaryResult<ListenerToken> {
        self.shard(db)?;
        let token = ListenerToken::mint();
        let entry = Arc::new(ListenerEntry {
            removed: AtomicBool::new(false),
            sink: ListenerSink::Document {
                db: db.clone(),
                doc_id: doc_id.to_string(),
                sink,
            },
        });
        self.shared.listeners.write().insert(token.clone(), entry);
        Ok(token)
    }

    fn add_query_listener(
        &self,
        query: &QueryHandle,
        sink: QueryChangeSink,
    ) -> BoundaryResult<ListenerToken> {
        let state = self.query_state(query)?;
        let token = ListenerToken::mint();
        let entry = Arc::new(ListenerEntry {
            removed: AtomicBool::new(false),
            sink: ListenerSink::Query {
                db: state.db.clone(),
                query: query.clone(),
                sink,
            },
        });
        self.shared
            .listeners
            .write()
            .insert(token.clone(), Arc::clone(&entry));

        // Live queries deliver their current result on registration.
        let weak = Arc::downgrade(&self.shared);
        let query = query.clone();
        self.shared.dispatcher.enqueue(Box::new(move || {
            deliver_initial_result(&weak, &query, &entry);
        }));

        Ok(token)
    }

    fn remove_listener(&self, token: &ListenerToken) -> BoundaryResult<()> {
        let entry = self
            .shared
            .listeners
            .write()
            .remove(token)
            .ok_or_else(|| BoundaryError::no_such_handle("listener"))?;
        entry.removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_query(
        &self,
        db: &DatabaseHandle,
        language: QueryLanguage,
        text: &str,
    ) -> BoundaryResult<QueryHandle> {
        let shard = self.shard(db)?;
        let plan = QueryPlan::compile(language, text)?;
        let handle = QueryHandle::mint();
        self.shared.queries.write().insert(
            handle.clone(),
            Arc::new(QueryState {
                db: shard.handle.clone(),
                plan,
                parameters: RwLock::new(Map::new()),
                last_delivered: Mutex::new(None),
            }),
        );
        Ok(handle)
    }

    fn query_execute(&self, query: &QueryHandle) -> BoundaryResult<String> {
        let state = self.query_state(query)?;
        let shard = self.shard(&state.db)?;
        let parameters = state.parameters.read().clone();
        execute_plan(&state.plan, &parameters, &shard.snapshot())
    }

    fn query_explain(&self, query: &QueryHandle) -> BoundaryResult<String> {
        let state = self.query_state(query)?;
        Ok(explain_plan(&state.plan))
    }

    fn query_parameters(&self, query: &QueryHandle) -> BoundaryResult<String> {
        let state = self.query_state(query)?;
        let parameters = state.parameters.read().clone();
        serde_json::to_string(&Value::Object(parameters))
            .map_err(|e| BoundaryError::invalid_json(e.to_string()))
    }

    fn query_set_parameters(
        &self,
        query: &QueryHandle,
        parameters_json: &str,
    ) -> BoundaryResult<()> {
        let state = self.query_state(query)?;
        let value: Value = serde_json::from_str(parameters_json)
            .map_err(|e| BoundaryError::invalid_json(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(BoundaryError::invalid_json(
                "query parameters must be a JSON object",
            ));
        };
        *state.parameters.write() = map;
        Ok(())
    }

    fn create_replicator(&self, config: ReplicatorConfig) -> BoundaryResult<ReplicatorHandle> {
        let handle = ReplicatorHandle::mint();
        self.shared.replicators.write().insert(
            handle.clone(),
            Arc::new(ReplicatorState::new(handle.clone(), config)),
        );
        Ok(handle)
    }

    fn replicator_config(
        &self,
        replicator: &ReplicatorHandle,
    ) -> BoundaryResult<ReplicatorConfig> {
        Ok(self.replicator_state(replicator)?.config.clone())
    }

    fn replicator_start(
        &self,
        replicator: &ReplicatorHandle,
        reset_checkpoint: bool,
    ) -> BoundaryResult<()> {
        let state = self.replicator_state(replicator)?;
        if reset_checkpoint {
            *state.checkpoint.lock() = Checkpoint::default();
        }
        if state.running.swap(true, Ordering::SeqCst) {
            // Already active; start is a no-op.
            return Ok(());
        }
        state.stop_requested.store(false, Ordering::SeqCst);
        {
            let mut status = state.status.lock();
            status.activity = ReplicatorActivity::Connecting;
            status.error = None;
            status.progress = ReplicatorProgress {
                complete: 0.0,
                document_count: 0,
            };
        }
        tracing::debug!(replicator = ?state.handle, "replicator starting");

        let shared = Arc::downgrade(&self.shared);
        let state = Arc::clone(&state);
        thread::spawn(move || crate::replicator::run(shared, state));
        Ok(())
    }

    fn replicator_stop(&self, replicator: &ReplicatorHandle) -> BoundaryResult<()> {
        let state = self.replicator_state(replicator)?;
        state.stop_requested.store(true, Ordering::SeqCst);
        state.wake.notify();
        Ok(())
    }

    fn replicator_status(
        &self,
        replicator: &ReplicatorHandle,
    ) -> BoundaryResult<ReplicatorStatus> {
        Ok(self.replicator_state(replicator)?.status.lock().clone())
    }
}
