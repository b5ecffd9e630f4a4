//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that separate what a collection promises
//! from how its documents are kept, so the store can run on different storage
//! implementations selected at construction time.
//!
//! # Overview
//!
//! - [`CollectionBackend`]: The contract every collection exposes to a database and
//!   the command dispatcher: insert, find, update, remove and count.
//! - [`DocumentStorage`]: The primitive keyed storage a backend provides for one
//!   collection. [`StandardCollection`](crate::collection::StandardCollection)
//!   implements the whole collection contract on top of it.
//! - [`StorageBackend`]: Factory for a store's collections.
//! - [`StoreBackendBuilder`]: Async factory trait for creating backend instances.
//!
//! # Examples
//!
//! ```ignore
//! use docstand::{prelude::*, memory::MemoryBackend};
//! use bson::doc;
//!
//! let store = DocumentStore::new(MemoryBackend::new(), StoreConfig::default())?;
//! let users = store.database("app")?.get_or_create_collection("users")?;
//!
//! let id = users.insert(doc! { "name": "Alice", "age": 30 })?;
//! assert_eq!(users.count(&doc! { "age": { "$gt": 18 } })?, 1);
//! # Ok::<(), docstand::error::MongoError>(())
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    collection::{CollectionContext, Cursor},
    error::{MongoError, MongoResult},
    query::{FindOptions, UpdateOptions, UpdateOutcome},
    value::IdentityKey,
};


/// The operations every collection supports, independent of its storage.
///
/// Implementations must be thread-safe: the same collection is shared by every
/// connection addressing it. Each operation is atomic with respect to the
/// others on the same collection; in particular an update either applies to
/// all of its matches or leaves the collection untouched.
///
/// # Error Handling
///
/// Operations return [`MongoResult<T>`](crate::error::MongoResult); faults are
/// reported to the client and never take down the store.
pub trait CollectionBackend: Send + Sync + Debug {
    /// Name of the database owning this collection.
    fn database_name(&self) -> &str;

    /// Name of this collection within its database.
    fn name(&self) -> &str;

    /// Fully qualified `database.collection` name.
    fn namespace(&self) -> String {
        format!("{}.{}", self.database_name(), self.name())
    }

    /// Name of the identity field documents are keyed by.
    fn id_field(&self) -> &str;

    /// Stores `document` and returns its identity.
    ///
    /// A document without an identity gets a generated one; the caller's
    /// document is consumed, so no caller-visible value is modified.
    ///
    /// # Errors
    ///
    /// - `DuplicateIdentity` if a document with an equal identity exists
    /// - `InvalidIdField` if the identity is an array
    /// - `BadValue` for top-level field names starting with `$`
    fn insert(&self, document: Document) -> MongoResult<Bson>;

    /// Returns a cursor over the documents matching `filter`.
    ///
    /// The cursor iterates a snapshot taken when the find runs; later writes to
    /// the collection are not observed.
    ///
    /// # Errors
    ///
    /// Returns the matcher's faults for malformed filters and a `BadValue`
    /// fault for malformed projections.
    fn find(&self, filter: &Document, options: &FindOptions) -> MongoResult<Cursor>;

    /// Applies `modification` to the first (or, with `multi`, every) document
    /// matching `filter`, inserting a new document when nothing matches and
    /// `upsert` is set.
    ///
    /// # Errors
    ///
    /// Returns the matcher's and updater's faults. A fault on any matched
    /// document leaves every document unchanged.
    fn update(
        &self,
        filter: &Document,
        modification: &Document,
        options: &UpdateOptions,
    ) -> MongoResult<UpdateOutcome>;

    /// Removes up to `limit` documents matching `filter` (all of them when
    /// `limit` is `None`) and returns how many were removed.
    fn remove(&self, filter: &Document, limit: Option<usize>) -> MongoResult<u64>;

    /// Counts the documents matching `filter`.
    fn count(&self, filter: &Document) -> MongoResult<u64> {
        Ok(self.find(filter, &FindOptions::default())?.count() as u64)
    }

    /// Number of stored documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every document.
    fn clear(&self);

    /// Handles a collection-level command the dispatcher does not know.
    ///
    /// The default implementation refuses every command.
    fn handle_command(&self, command: &str, _body: &Document) -> MongoResult<Document> {
        Err(MongoError::unsupported_operation(command))
    }
}

/// Primitive keyed document storage for a single collection.
///
/// Callers hold exclusive access (`&mut self`) for writes and shared access for
/// reads; locking is the collection's responsibility, not the storage's.
pub trait DocumentStorage: Send + Sync + Debug {
    fn get(&self, key: &IdentityKey) -> Option<Arc<Document>>;

    fn contains(&self, key: &IdentityKey) -> bool {
        self.get(key).is_some()
    }

    /// Stores a document under a key known to be absent.
    fn insert(&mut self, key: IdentityKey, document: Arc<Document>);

    /// Replaces the document stored under `key`; returns whether one existed.
    fn replace(&mut self, key: &IdentityKey, document: Arc<Document>) -> bool;

    fn remove(&mut self, key: &IdentityKey) -> Option<Arc<Document>>;

    /// Every stored document, in insertion order.
    fn snapshot(&self) -> Vec<Arc<Document>>;

    fn len(&self) -> usize;

    fn clear(&mut self);
}

/// Factory for the collections of a store.
///
/// A store calls [`open_collection`](StorageBackend::open_collection) the first
/// time a collection is referenced and
/// [`drop_collection`](StorageBackend::drop_collection) when it is dropped.
pub trait StorageBackend: Send + Sync + Debug {
    /// Short name of the backend, used in logs.
    fn name(&self) -> &'static str;

    /// Creates the collection described by `context`.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` fault if the backend cannot provide storage.
    fn open_collection(&self, context: CollectionContext) -> MongoResult<Arc<dyn CollectionBackend>>;

    /// Releases any backend resources held for a dropped collection.
    ///
    /// The default implementation does nothing.
    fn drop_collection(&self, _database: &str, _name: &str) {}
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open_collection(&self, context: CollectionContext) -> MongoResult<Arc<dyn CollectionBackend>> {
        (**self).open_collection(context)
    }

    fn drop_collection(&self, database: &str, name: &str) {
        (**self).drop_collection(database, name)
    }
}

/// Builder for creating storage backend instances.
///
/// Types implementing this trait can asynchronously construct and initialize
/// a storage backend. This is useful for backends that require async
/// initialization (e.g., allocating or loading storage).
///
/// # Type Parameters
///
/// * `Backend` - The concrete storage backend type that this builder produces
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StorageBackend;

    async fn build(self) -> MongoResult<Self::Backend>;
}
