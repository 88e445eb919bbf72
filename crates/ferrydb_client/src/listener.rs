//! Listener registry and cancellation tokens.
//!
//! Every change-listener registration is recorded as an explicit
//! subscription: the engine token, a cancellation flag, and the engine to
//! unregister from. The wrapped sink re-checks the flag immediately before
//! invoking the application callback, so correctness never depends on
//! closure lifetime. Cancellation prevents every future delivery; a
//! delivery already past the check may still complete.

use crate::error::ClientResult;
use ferrydb_boundary::{BoundaryResult, Engine, ListenerToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// One recorded subscription.
///
/// Holds the engine weakly: the record travels inside the sink the engine
/// stores, so a strong reference would keep the engine alive through its
/// own listener table.
pub(crate) struct SubscriptionRecord {
    id: Uuid,
    engine: Weak<dyn Engine>,
    token: Mutex<Option<ListenerToken>>,
    cancelled: AtomicBool,
}

impl SubscriptionRecord {
    /// Checked by wrapped sinks immediately before each delivery.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.token.lock().take() {
            // The engine may already be gone, or may have dropped the
            // token when the database closed; unregistration is
            // best-effort then.
            if let Some(engine) = self.engine.upgrade() {
                let _ = engine.remove_listener(&token);
            }
        }
    }
}

/// All live subscriptions of one owner (a database and its derived
/// queries). Torn down as a whole when the owner closes.
pub(crate) struct ListenerRegistry {
    records: Mutex<HashMap<Uuid, Arc<SubscriptionRecord>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a listener. `attach` receives the subscription record (so
    /// the sink it builds can check the cancellation flag) and returns the
    /// engine token.
    pub(crate) fn register<F>(
        &self,
        engine: Arc<dyn Engine>,
        attach: F,
    ) -> ClientResult<ListenerRegistration>
    where
        F: FnOnce(&Arc<SubscriptionRecord>) -> BoundaryResult<ListenerToken>,
    {
        let record = Arc::new(SubscriptionRecord {
            id: Uuid::new_v4(),
            engine: Arc::downgrade(&engine),
            token: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });

        let token = attach(&record)?;
        *record.token.lock() = Some(token);

        let mut records = self.records.lock();
        records.retain(|_, record| !record.is_cancelled());
        records.insert(record.id, Arc::clone(&record));

        Ok(ListenerRegistration { record })
    }

    /// Cancels every live subscription. Called on close/delete.
    pub(crate) fn cancel_all(&self) {
        let records: Vec<Arc<SubscriptionRecord>> =
            self.records.lock().drain().map(|(_, record)| record).collect();
        for record in records {
            record.cancel();
        }
    }
}

/// A live change-listener subscription.
///
/// Returned by every `add_*_change_listener` call. Call [`cancel`] to end
/// the subscription. Dropping the registration does *not* cancel it: the
/// subscription stays live until cancelled explicitly or its database
/// closes.
///
/// [`cancel`]: ListenerRegistration::cancel
pub struct ListenerRegistration {
    record: Arc<SubscriptionRecord>,
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.record.id)
            .field("cancelled", &self.record.is_cancelled())
            .finish()
    }
}

impl ListenerRegistration {
    /// Ends the subscription.
    ///
    /// Idempotent: calling it again has no further effect. Once the first
    /// call returns, no callback fires for changes committed after it; a
    /// delivery already in flight at the engine is not guaranteed to be
    /// suppressed.
    pub fn cancel(&self) {
        self.record.cancel();
    }

    /// Returns true once the subscription has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.record.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrydb_engine::LocalEngine;

    fn engine() -> Arc<dyn Engine> {
        Arc::new(LocalEngine::new())
    }

    #[test]
    fn cancel_is_idempotent() {
        let engine = engine();
        let db = engine.open_database("db", None).unwrap();

        let registry = ListenerRegistry::new();
        let registration = registry
            .register(Arc::clone(&engine), |_record| {
                engine.add_database_listener(&db, Box::new(|_| {}))
            })
            .unwrap();

        assert!(!registration.is_cancelled());
        registration.cancel();
        assert!(registration.is_cancelled());
        registration.cancel();
        assert!(registration.is_cancelled());
    }

    #[test]
    fn cancel_all_cancels_every_record() {
        let engine = engine();
        let db = engine.open_database("db", None).unwrap();

        let registry = ListenerRegistry::new();
        let first = registry
            .register(Arc::clone(&engine), |_record| {
                engine.add_database_listener(&db, Box::new(|_| {}))
            })
            .unwrap();
        let second = registry
            .register(Arc::clone(&engine), |_record| {
                engine.add_database_listener(&db, Box::new(|_| {}))
            })
            .unwrap();

        registry.cancel_all();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn failed_attach_surfaces_the_boundary_error() {
        let engine = engine();
        let db = engine.open_database("db", None).unwrap();
        engine.close_database(&db).unwrap();

        let registry = ListenerRegistry::new();
        let result = registry.register(Arc::clone(&engine), |_record| {
            engine.add_database_listener(&db, Box::new(|_| {}))
        });
        assert!(result.is_err());
    }
}
