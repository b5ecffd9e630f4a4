//! In-memory storage backend for docstand.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StorageBackend` trait. Documents live only as long as the store does,
//! which makes it the backend of choice for tests and local development.
//!
//! # Features
//!
//! - **Thread-safe access** - Each collection is guarded by its own read-write lock
//! - **Insertion order** - Unsorted finds return documents in the order they were stored
//! - **Full query support** - Filtering, sorting, projection and pagination come from `docstand-core`
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use docstand::{prelude::*, memory::MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::builder().build().await?;
//!     let store = DocumentStore::new(backend, StoreConfig::default())?;
//!     let users = store.database("app")?.get_or_create_collection("users")?;
//!
//!     users.insert(doc! { "name": "Alice" })?;
//!     assert_eq!(users.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstand_memory;

pub mod store;

pub use store::{MemoryBackend, MemoryBackendBuilder, MemoryStorage};
