//! # FerryDB Local Engine
//!
//! A reference engine behind the FerryDB boundary.
//!
//! This crate provides [`LocalEngine`], an in-process implementation of
//! the [`ferrydb_boundary::Engine`] trait:
//! - In-memory and directory-backed document storage with advisory
//!   locking and atomic record persistence
//! - Transaction batching with a single change notification per commit
//! - A query evaluator for both boundary query languages
//! - Asynchronous change dispatch on a dedicated notifier thread
//! - A replicator state machine driving push/pull sessions between
//!   databases open in the same engine
//!
//! The object model in `ferrydb_client` consumes this crate only through
//! `Arc<dyn Engine>`; nothing here is part of the application-facing API.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod dispatch;
mod engine;
mod query;
mod replicator;
mod store;

pub use engine::LocalEngine;
