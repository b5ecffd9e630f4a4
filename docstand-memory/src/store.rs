//! In-memory storage implementation for document stores.
//!
//! This module provides a simple backend that keeps every collection's
//! documents in an insertion-ordered map keyed by identity.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::trace;

use docstand_core::{
    backend::{CollectionBackend, DocumentStorage, StorageBackend, StoreBackendBuilder},
    collection::{CollectionContext, StandardCollection},
    error::MongoResult,
    value::IdentityKey,
};


/// Documents of one collection, in insertion order.
///
/// Removing a document keeps the relative order of the remaining ones, so
/// unsorted finds return documents in the order they were first stored.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: IndexMap<IdentityKey, Arc<Document>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            documents: IndexMap::with_capacity(capacity),
        }
    }
}

impl DocumentStorage for MemoryStorage {
    fn get(&self, key: &IdentityKey) -> Option<Arc<Document>> {
        self.documents.get(key).cloned()
    }

    fn contains(&self, key: &IdentityKey) -> bool {
        self.documents.contains_key(key)
    }

    fn insert(&mut self, key: IdentityKey, document: Arc<Document>) {
        self.documents.insert(key, document);
    }

    fn replace(&mut self, key: &IdentityKey, document: Arc<Document>) -> bool {
        match self.documents.get_mut(key) {
            Some(slot) => {
                *slot = document;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &IdentityKey) -> Option<Arc<Document>> {
        self.documents.shift_remove(key)
    }

    fn snapshot(&self) -> Vec<Arc<Document>> {
        self.documents.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn clear(&mut self) {
        self.documents.clear();
    }
}

/// Thread-safe in-memory storage backend.
///
/// Every collection it opens is a [`StandardCollection`] over a
/// [`MemoryStorage`]. Nothing is persisted: dropping the store drops the data.
///
/// `MemoryBackend` is cheap to clone; clones share the record of open
/// namespaces.
///
/// # Example
///
/// ```ignore
/// use docstand::{prelude::*, memory::MemoryBackend};
///
/// let store = DocumentStore::new(MemoryBackend::new(), StoreConfig::default())?;
/// let users = store.database("app")?.get_or_create_collection("users")?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    initial_capacity: usize,
    namespaces: Arc<RwLock<IndexSet<String>>>,
}

impl MemoryBackend {
    /// Creates a backend with no pre-allocated capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for configuring the backend.
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::default()
    }

    /// Namespaces (`database.collection`) of the collections currently open.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().iter().cloned().collect()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_collection(&self, context: CollectionContext) -> MongoResult<Arc<dyn CollectionBackend>> {
        let namespace = context.namespace();
        trace!(namespace = %namespace, capacity = self.initial_capacity, "opening in-memory collection");

        let storage = MemoryStorage::with_capacity(self.initial_capacity);
        self.namespaces.write().insert(namespace);
        Ok(Arc::new(StandardCollection::new(context, storage)))
    }

    fn drop_collection(&self, database: &str, name: &str) {
        self.namespaces
            .write()
            .shift_remove(&format!("{database}.{name}"));
    }
}

/// Builder for constructing [`MemoryBackend`] instances.
///
/// # Example
///
/// ```ignore
/// use docstand::{backend::StoreBackendBuilder, memory::MemoryBackend};
///
/// let backend = MemoryBackend::builder().initial_capacity(1024).build().await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackendBuilder {
    initial_capacity: usize,
}

impl MemoryBackendBuilder {
    /// Number of documents each new collection has room for before growing.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MemoryBackendBuilder {
    type Backend = MemoryBackend;

    async fn build(self) -> MongoResult<Self::Backend> {
        Ok(MemoryBackend {
            initial_capacity: self.initial_capacity,
            ..MemoryBackend::default()
        })
    }
}
