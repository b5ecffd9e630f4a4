//! Convenient re-exports of commonly used types from docstand.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docstand::prelude::*;
//! ```
//!
//! This provides access to:
//! - Stores, databases and the collection contract
//! - Storage backends and builders
//! - Find and update options
//! - Command dispatch and replies
//! - Error types

pub use docstand_core::{
    backend::{CollectionBackend, DocumentStorage, StorageBackend, StoreBackendBuilder},
    collection::{CollectionContext, Cursor, StandardCollection},
    config::{IdentityScheme, StoreConfig},
    database::Database,
    dispatch::{Dispatcher, QueryEnvelope, QueryHandler, QueryKind, Reply, WriteError, WriteOutcome},
    error::{ErrorKind, MongoError, MongoResult},
    future::AsyncResult,
    identity::{IdentityDeriver, IdentityGenerator},
    matcher::{FilterMatcher, OperatorRegistry},
    query::{FindOptions, Sort, SortDirection, UpdateOptions, UpdateOutcome},
    store::{DocumentStore, DocumentStoreBuilder},
    update::{UpdateRegistry, Updater},
};
