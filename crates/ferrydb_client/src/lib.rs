//! # FerryDB Client
//!
//! The typed object model over a FerryDB storage/replication engine.
//!
//! This crate is the application-facing layer: databases, documents,
//! queries, and replicators as handles whose validity is enforced before
//! every engine call. It provides:
//! - [`Database`]: open/close/delete lifecycle, document CRUD,
//!   transactions, and change subscriptions
//! - [`Document`] / [`MutableDocument`]: read-only snapshots and buffered
//!   drafts committed through `save_document`
//! - [`Query`]: compiled, parameterized queries with live result
//!   subscriptions
//! - [`Replicator`]: a configured sync session observed through status
//!   snapshots
//! - [`ListenerRegistration`]: single-use, idempotent cancellation of
//!   change listeners
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferrydb_client::{Database, MutableDocument};
//! use ferrydb_engine::LocalEngine;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(LocalEngine::new());
//! let db = Database::open(engine, "inventory", None)?;
//!
//! let doc = MutableDocument::with_id(&db, "item-1")?;
//! doc.set_json(r#"{"name": "anchor", "qty": 3}"#)?;
//! db.save_document(&doc)?;
//!
//! let registration = db.add_change_listener(|ids| println!("changed: {ids:?}"))?;
//! // ...
//! registration.cancel();
//! db.close()?;
//! ```
//!
//! ## Errors
//!
//! Usage errors ([`ClientError::InvalidState`]) are detected client-side
//! before any engine call: operating on a closed database, an invalidated
//! document, or a nested transaction. Engine failures pass through as
//! [`ClientError::Boundary`]. Replicator faults are reported only through
//! [`Replicator::status`], never by the synchronous call path.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod document;
mod error;
mod listener;
mod query;
mod replicator;

pub use database::Database;
pub use document::{Document, MutableDocument};
pub use error::{ClientError, ClientResult};
pub use listener::ListenerRegistration;
pub use query::Query;
pub use replicator::{Replicator, ReplicatorConfiguration, ReplicatorEndpoint};

// Boundary types that appear in this crate's public API.
pub use ferrydb_boundary::{
    BoundaryError, Engine, QueryLanguage, ReplicatorActivity, ReplicatorConfig,
    ReplicatorDirection, ReplicatorProgress, ReplicatorStatus,
};
