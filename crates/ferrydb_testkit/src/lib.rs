//! # FerryDB Testkit
//!
//! Test utilities for FerryDB.
//!
//! This crate provides:
//! - Test fixtures: databases on a fresh local engine, in memory or in a
//!   temporary directory, with automatic cleanup
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferrydb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_memory_db(|db| {
//!         save_json(db, "doc1", &serde_json::json!({"n": 1}));
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
