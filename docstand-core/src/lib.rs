//! An in-process stand-in for a document database server.
//!
//! This crate is the core of the docstand project and provides:
//!
//! - **Identity derivation** ([`identity`]) - Choosing or generating the identity of inserted documents
//! - **Filter matching** ([`matcher`]) - Compiling query filters into predicates over documents
//! - **Updates** ([`update`]) - Replacement and operator-based document modification
//! - **Collection contract** ([`backend`], [`collection`]) - The operations every collection supports and a standard implementation over pluggable storage
//! - **Databases and stores** ([`database`], [`store`]) - Named groups of collections created on first reference
//! - **Command dispatch** ([`dispatch`]) - Routing decoded client requests and rendering replies
//! - **Completed results** ([`future`]) - Awaitable results for asynchronous callers
//! - **Error handling** ([`error`]) - Typed faults with server error codes
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docstand::{prelude::*, memory::MemoryBackend};
//!
//! let store = DocumentStore::new(MemoryBackend::new(), StoreConfig::default())?;
//! let people = store.database("app")?.get_or_create_collection("people")?;
//!
//! people.insert(doc! { "name": "Ada", "age": 36 })?;
//! let adults = people.find(&doc! { "age": { "$gte": 18 } }, &FindOptions::default())?;
//! assert_eq!(adults.count(), 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstand_core;

pub mod backend;
pub mod collection;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod future;
pub mod identity;
pub mod matcher;
mod operators;
pub mod query;
pub mod store;
pub mod update;
pub mod value;
