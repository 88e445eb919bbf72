//! # FerryDB Boundary
//!
//! The opaque boundary between the FerryDB object model and a storage/
//! replication engine.
//!
//! This crate provides:
//! - Type-tagged, unforgeable handles for engine-owned resources
//! - The [`Engine`] trait: the narrow synchronous call surface every
//!   engine implements
//! - Boundary error types, distinct from the client layer's usage errors
//! - Replicator configuration and status types
//!
//! ## Contract
//!
//! Document bodies and query parameter sets cross this boundary as JSON
//! *text*, never as structured values. Change notifications are the only
//! asynchronous part of the surface: an engine delivers them on an
//! unspecified context, in commit order per handle.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod handle;
mod replicator;

pub use engine::{
    DatabaseChangeSink, DocumentChangeSink, Engine, QueryChangeSink, QueryLanguage,
};
pub use error::{BoundaryError, BoundaryResult};
pub use handle::{DatabaseHandle, DocumentHandle, ListenerToken, QueryHandle, ReplicatorHandle};
pub use replicator::{
    Endpoint, ReplicatorActivity, ReplicatorConfig, ReplicatorDirection, ReplicatorProgress,
    ReplicatorStatus,
};
