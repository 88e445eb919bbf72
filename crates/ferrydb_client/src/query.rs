//! Compiled, parameterized queries.

use crate::database::DatabaseInner;
use crate::error::{ClientError, ClientResult};
use crate::listener::ListenerRegistration;
use ferrydb_boundary::{Engine, QueryChangeSink, QueryHandle};
use std::sync::{Arc, Weak};

/// A compiled query bound to one database.
///
/// Parameters are a flat string-keyed JSON object, replaced as a whole:
/// re-setting them does not re-compile the query text. A query lives as
/// long as its owning database; it holds only a weak back-reference and
/// fails with a usage error once the database closes.
pub struct Query {
    db: Weak<DatabaseInner>,
    engine: Arc<dyn Engine>,
    handle: QueryHandle,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl Query {
    pub(crate) fn new(
        db: Weak<DatabaseInner>,
        engine: Arc<dyn Engine>,
        handle: QueryHandle,
    ) -> Self {
        Self { db, engine, handle }
    }

    fn database(&self, action: &str) -> ClientResult<Arc<DatabaseInner>> {
        match self.db.upgrade() {
            Some(inner) if inner.is_open() => Ok(inner),
            _ => Err(ClientError::invalid_state(format!(
                "cannot {action} a query on a closed database"
            ))),
        }
    }

    /// Runs the query against current database state.
    ///
    /// Returns a JSON-encoded array of result rows. Executing twice over
    /// unchanged data yields identical result sets.
    pub fn execute(&self) -> ClientResult<String> {
        self.database("execute")?;
        Ok(self.engine.query_execute(&self.handle)?)
    }

    /// Returns a human-readable description of the query plan.
    ///
    /// Diagnostics only; the text is not meant to be parsed.
    pub fn explain(&self) -> ClientResult<String> {
        self.database("explain")?;
        Ok(self.engine.query_explain(&self.handle)?)
    }

    /// Reads the full parameter set as one JSON object.
    pub fn parameters(&self) -> ClientResult<String> {
        self.database("read the parameters of")?;
        Ok(self.engine.query_parameters(&self.handle)?)
    }

    /// Replaces the full parameter set.
    ///
    /// There are no partial updates: read, modify, and write the whole
    /// object.
    pub fn set_parameters(&self, parameters_json: &str) -> ClientResult<()> {
        self.database("set the parameters of")?;
        Ok(self
            .engine
            .query_set_parameters(&self.handle, parameters_json)?)
    }

    /// Subscribes to live-updating results.
    ///
    /// The callback receives a fresh JSON-encoded result set on
    /// registration and again whenever data the query depends on changes.
    pub fn add_change_listener(
        &self,
        handler: impl Fn(String) + Send + Sync + 'static,
    ) -> ClientResult<ListenerRegistration> {
        let inner = self.database("listen to changes on")?;
        let engine = Arc::clone(&self.engine);
        let handle = self.handle.clone();
        inner
            .registry
            .register(Arc::clone(&self.engine), move |record| {
                let record = Arc::clone(record);
                let sink: QueryChangeSink = Box::new(move |results| {
                    if !record.is_cancelled() {
                        handler(results);
                    }
                });
                engine.add_query_listener(&handle, sink)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, MutableDocument, QueryLanguage};
    use ferrydb_engine::LocalEngine;
    use serde_json::{json, Value};

    fn open() -> Database {
        Database::open(Arc::new(LocalEngine::new()), "db1", None).unwrap()
    }

    fn save(db: &Database, id: &str, body: Value) {
        let doc = MutableDocument::with_id(db, id).unwrap();
        doc.set_value(&body).unwrap();
        assert!(db.save_document(&doc).unwrap());
    }

    #[test]
    fn execute_and_explain() {
        let db = open();
        save(&db, "u1", json!({"kind": "user", "name": "Ada"}));
        save(&db, "g1", json!({"kind": "group", "name": "Ops"}));

        let query = db
            .create_query(
                QueryLanguage::Sql,
                "SELECT name FROM docs WHERE kind = 'user'",
            )
            .unwrap();

        let rows: Value = serde_json::from_str(&query.execute().unwrap()).unwrap();
        assert_eq!(rows, json!([{"name": "Ada"}]));
        assert!(query.explain().unwrap().contains("SCAN docs"));
    }

    #[test]
    fn parameters_are_read_modify_write() {
        let db = open();
        save(&db, "u1", json!({"kind": "user"}));

        let query = db
            .create_query(QueryLanguage::Json, r#"{"where": {"kind": "$kind"}}"#)
            .unwrap();

        assert_eq!(query.parameters().unwrap(), "{}");
        query.set_parameters(r#"{"kind": "user"}"#).unwrap();
        let parameters: Value = serde_json::from_str(&query.parameters().unwrap()).unwrap();
        assert_eq!(parameters, json!({"kind": "user"}));

        let rows: Value = serde_json::from_str(&query.execute().unwrap()).unwrap();
        assert_eq!(rows, json!([{"kind": "user", "_id": "u1"}]));
    }

    #[test]
    fn compile_failure_carries_diagnostic_and_database_survives() {
        let db = open();
        let err = db
            .create_query(QueryLanguage::Sql, "SELEC nonsense")
            .unwrap_err();
        assert!(!err.is_invalid_state());
        assert!(!err.to_string().is_empty());

        save(&db, "x", json!({"still": "works"}));
        assert!(db.get_document("x").unwrap().is_some());
    }

    #[test]
    fn queries_of_a_closed_database_are_unusable() {
        let db = open();
        let query = db
            .create_query(QueryLanguage::Sql, "SELECT * FROM docs")
            .unwrap();
        db.close().unwrap();

        assert!(query.execute().unwrap_err().is_invalid_state());
        assert!(query.explain().unwrap_err().is_invalid_state());
        assert!(query.parameters().unwrap_err().is_invalid_state());
        assert!(query.set_parameters("{}").unwrap_err().is_invalid_state());
        assert!(query
            .add_change_listener(|_| {})
            .unwrap_err()
            .is_invalid_state());
    }
}
