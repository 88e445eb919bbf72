//! Read-only and editable document views.

use crate::database::DatabaseInner;
use crate::error::{ClientError, ClientResult};
use ferrydb_boundary::{BoundaryError, DocumentHandle, Engine};
use parking_lot::Mutex;
use serde_json::Value;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// An immutable snapshot of a stored document.
///
/// The body reflects the document at fetch time, not live state. A
/// document holds a weak back-reference to its database: it becomes
/// unusable once the database closes, and is invalidated for good when
/// deleted through [`Database::delete_document`].
///
/// [`Database::delete_document`]: crate::Database::delete_document
pub struct Document {
    engine: Arc<dyn Engine>,
    db: Weak<DatabaseInner>,
    handle: DocumentHandle,
    id: String,
    saved: AtomicBool,
    invalidated: AtomicBool,
}

impl Document {
    pub(crate) fn new(
        db: Weak<DatabaseInner>,
        engine: Arc<dyn Engine>,
        handle: DocumentHandle,
        id: String,
        saved: bool,
    ) -> Self {
        Self {
            engine,
            db,
            handle,
            id,
            saved: AtomicBool::new(saved),
            invalidated: AtomicBool::new(false),
        }
    }

    /// The document id. Stable for the document's identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true once the document has been persisted.
    #[must_use]
    pub fn saved(&self) -> bool {
        self.saved.load(Ordering::SeqCst)
    }

    /// Encodes the body as JSON text.
    pub fn to_json(&self) -> ClientResult<String> {
        self.guard("read")?;
        Ok(self.engine.document_to_json(&self.handle)?)
    }

    /// Decodes the body into a structured value.
    pub fn to_value(&self) -> ClientResult<Value> {
        let json = self.to_json()?;
        serde_json::from_str(&json)
            .map_err(|e| ClientError::from(BoundaryError::invalid_json(e.to_string())))
    }

    /// Returns an editable copy of this document's body under the same id.
    pub fn to_mutable(&self) -> ClientResult<MutableDocument> {
        self.guard("copy")?;
        let body = self.engine.document_to_json(&self.handle)?;
        let handle = self.engine.create_document(Some(&self.id))?;
        self.engine.document_set_json(&handle, &body)?;
        Ok(MutableDocument {
            base: Document::new(
                self.db.clone(),
                Arc::clone(&self.engine),
                handle,
                self.id.clone(),
                self.saved(),
            ),
            draft: Mutex::new(None),
        })
    }

    /// Fails unless the owning database is open and the document has not
    /// been deleted.
    pub(crate) fn guard(&self, action: &str) -> ClientResult<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(ClientError::invalid_state(format!(
                "cannot {action} a deleted document"
            )));
        }
        let open = self.db.upgrade().map(|db| db.is_open()).unwrap_or(false);
        if !open {
            return Err(ClientError::invalid_state(format!(
                "cannot {action} a document of a closed database"
            )));
        }
        Ok(())
    }

    pub(crate) fn handle(&self) -> &DocumentHandle {
        &self.handle
    }

    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_saved(&self) {
        self.saved.store(true, Ordering::SeqCst);
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.engine.release_document(&self.handle);
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("id", &self.id).finish_non_exhaustive()
    }
}

/// An editable document draft.
///
/// Edits made through [`set_json`]/[`set_value`] are buffered client-side;
/// nothing reaches the engine until the draft is saved through
/// [`Database::save_document`], which is the only path that commits.
///
/// [`set_json`]: MutableDocument::set_json
/// [`set_value`]: MutableDocument::set_value
/// [`Database::save_document`]: crate::Database::save_document
#[derive(Debug)]
pub struct MutableDocument {
    base: Document,
    /// Pending body replacement, buffered until save.
    draft: Mutex<Option<String>>,
}

impl MutableDocument {
    /// Creates a fresh document with an engine-assigned id.
    pub fn new(database: &crate::Database) -> ClientResult<Self> {
        Self::create(database, None)
    }

    /// Creates a fresh document with an explicit id.
    ///
    /// Saving it over an existing id overwrites the stored document.
    pub fn with_id(database: &crate::Database, id: &str) -> ClientResult<Self> {
        Self::create(database, Some(id))
    }

    fn create(database: &crate::Database, id: Option<&str>) -> ClientResult<Self> {
        database.inner.require_open("create a document in")?;
        let engine = Arc::clone(&database.inner.engine);
        let handle = engine.create_document(id)?;
        let id = engine.document_id(&handle)?;
        Ok(Self {
            base: Document::new(Arc::downgrade(&database.inner), engine, handle, id, false),
            draft: Mutex::new(None),
        })
    }

    pub(crate) fn from_existing(
        db: Weak<DatabaseInner>,
        engine: Arc<dyn Engine>,
        handle: DocumentHandle,
        id: String,
    ) -> Self {
        Self {
            base: Document::new(db, engine, handle, id, true),
            draft: Mutex::new(None),
        }
    }

    /// Replaces the whole body in the local draft.
    ///
    /// Pure client-side state: the text is not validated here. It crosses
    /// the boundary on save, where malformed JSON surfaces as a boundary
    /// error.
    pub fn set_json(&self, json: impl Into<String>) -> ClientResult<()> {
        self.base.guard("edit")?;
        *self.draft.lock() = Some(json.into());
        Ok(())
    }

    /// Replaces the whole body with a structured value.
    pub fn set_value(&self, value: &Value) -> ClientResult<()> {
        self.set_json(value.to_string())
    }

    /// Encodes the draft body, falling back to the last known engine body
    /// when no edit is pending.
    pub fn to_json(&self) -> ClientResult<String> {
        self.base.guard("read")?;
        if let Some(draft) = &*self.draft.lock() {
            return Ok(draft.clone());
        }
        Ok(self.base.engine.document_to_json(self.base.handle())?)
    }

    /// Decodes the draft body into a structured value.
    pub fn to_value(&self) -> ClientResult<Value> {
        let json = self.to_json()?;
        serde_json::from_str(&json)
            .map_err(|e| ClientError::from(BoundaryError::invalid_json(e.to_string())))
    }

    /// Pushes a pending draft across the boundary. The draft is kept when
    /// the push fails, so a failed save loses nothing.
    pub(crate) fn flush_draft(&self) -> ClientResult<()> {
        let pending = self.draft.lock().clone();
        if let Some(text) = pending {
            self.base
                .engine
                .document_set_json(self.base.handle(), &text)?;
            *self.draft.lock() = None;
        }
        Ok(())
    }
}

impl Deref for MutableDocument {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.base
    }
}
