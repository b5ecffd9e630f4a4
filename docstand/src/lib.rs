//! Main docstand crate: an in-process stand-in for a document database server.
//!
//! This crate is the primary entry point for users of docstand. It re-exports
//! the core types from `docstand-core` and the storage backends shipped with
//! the project, so tests can run against a faithful imitation of a document
//! database without starting one.
//!
//! # Features
//!
//! - **Mongo-style documents** - Documents are BSON; identities are derived or generated on insert
//! - **Query filters** - Comparison, set, element, array, regex and logical operators
//! - **Updates** - Replacements and field operators such as `$set`, `$inc` and `$push`, with upserts
//! - **Command dispatch** - Decoded client requests are routed to collections and answered with reply documents
//! - **Pluggable storage** - Backends implement a small storage trait; an in-memory one is included
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use docstand::{prelude::*, memory::MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MongoError> {
//!     let store = DocumentStore::new(MemoryBackend::builder().build().await?, StoreConfig::default())?;
//!     let orders = store.database("shop")?.get_or_create_collection("orders")?;
//!
//!     orders.insert(doc! { "item": "tea", "qty": 2 })?;
//!     orders.update(
//!         &doc! { "item": "tea" },
//!         &doc! { "$inc": { "qty": 1 } },
//!         &UpdateOptions::default(),
//!     )?;
//!
//!     let found = orders.find(&doc! { "qty": { "$gte": 3 } }, &FindOptions::default())?;
//!     assert_eq!(found.count(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Serving commands
//!
//! Transport layers hand decoded command documents to a [`Dispatcher`](dispatch::Dispatcher)
//! and send back whatever reply it renders. Faults never escape: they come back
//! as error replies carrying the server's error code.
//!
//! ```ignore
//! use bson::doc;
//! use docstand::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MongoError> {
//!     let dispatcher = docstand::in_memory(StoreConfig::default()).await?;
//!
//!     let reply = dispatcher
//!         .serve_command("shop", &doc! { "insert": "orders", "documents": [{ "item": "tea" }] })
//!         .await;
//!     assert!(!reply.is_error());
//!
//!     let reply = dispatcher.serve_command("shop", &doc! { "frobnicate": 1 }).await;
//!     assert!(reply.is_unsupported());
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing

use std::sync::Arc;

use tracing::info;

pub mod prelude;

pub use docstand_core::{
    backend, collection, config, database, dispatch, document, error, future, identity, matcher, query, store,
    update, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docstand_memory::{MemoryBackend, MemoryBackendBuilder, MemoryStorage};
}

use crate::{
    backend::StoreBackendBuilder,
    config::StoreConfig,
    dispatch::Dispatcher,
    error::MongoResult,
    store::DocumentStore,
};

/// Builds a dispatcher over a fresh in-memory store.
///
/// # Errors
///
/// Returns a `BadValue` fault if `config` is invalid.
pub async fn in_memory(config: StoreConfig) -> MongoResult<Dispatcher> {
    let backend = memory::MemoryBackend::builder().build().await?;
    let store = DocumentStore::builder(backend).config(config).build()?;
    info!(backend = store.backend_name(), "in-memory dispatcher ready");

    Ok(Dispatcher::new(Arc::new(store)))
}
