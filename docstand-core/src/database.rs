//! Databases: named groups of collections.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    backend::{CollectionBackend, StorageBackend},
    collection::CollectionContext,
    error::{ErrorKind, MongoError, MongoResult},
    identity::IdentityDeriver,
    matcher::FilterMatcher,
    update::Updater,
};


/// The components every collection of a store is created with.
#[derive(Debug, Clone)]
pub struct CollectionDefaults {
    pub deriver: IdentityDeriver,
    pub matcher: FilterMatcher,
    pub updater: Updater,
    /// Upper bound for `database.collection` names.
    pub max_namespace_length: usize,
}

impl CollectionDefaults {
    fn context(&self, database: &str, name: &str) -> CollectionContext {
        CollectionContext {
            database: database.to_string(),
            name: name.to_string(),
            deriver: self.deriver.clone(),
            matcher: self.matcher.clone(),
            updater: self.updater.clone(),
        }
    }
}

/// A named group of collections.
///
/// Collections are created on first reference. Lookup and creation are safe to
/// race: every caller asking for the same name gets the same collection.
#[derive(Debug)]
pub struct Database {
    name: String,
    backend: Arc<dyn StorageBackend>,
    defaults: CollectionDefaults,
    collections: RwLock<IndexMap<String, Arc<dyn CollectionBackend>>>,
}

impl Database {
    pub fn new(name: impl Into<String>, backend: Arc<dyn StorageBackend>, defaults: CollectionDefaults) -> Self {
        Self {
            name: name.into(),
            backend,
            defaults,
            collections: RwLock::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate_collection_name(&self, name: &str) -> MongoResult<()> {
        if name.is_empty() {
            return Err(MongoError::new(ErrorKind::BadValue, "Invalid collection name: empty"));
        }
        if name.contains('$') || name.contains('\0') {
            return Err(MongoError::new(
                ErrorKind::BadValue,
                format!("Invalid collection name: '{name}'"),
            ));
        }
        let namespace_length = self.name.len() + 1 + name.len();
        if namespace_length > self.defaults.max_namespace_length {
            return Err(MongoError::new(
                ErrorKind::BadValue,
                format!(
                    "Fully qualified namespace is too long. Namespace: {}.{name} Max: {}",
                    self.name, self.defaults.max_namespace_length
                ),
            ));
        }
        Ok(())
    }

    /// Returns the collection named `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault for invalid names and the backend's fault if
    /// it cannot open the collection.
    pub fn get_or_create_collection(&self, name: &str) -> MongoResult<Arc<dyn CollectionBackend>> {
        if let Some(collection) = self.collections.read().get(name) {
            return Ok(collection.clone());
        }

        self.validate_collection_name(name)?;
        let mut collections = self.collections.write();
        // another caller may have created it between the two locks
        if let Some(collection) = collections.get(name) {
            return Ok(collection.clone());
        }

        let collection = self.backend.open_collection(self.defaults.context(&self.name, name))?;
        collections.insert(name.to_string(), collection.clone());
        debug!(database = %self.name, collection = name, backend = self.backend.name(), "created collection");
        Ok(collection)
    }

    /// Creates the collection named `name`.
    ///
    /// # Errors
    ///
    /// Returns a `NamespaceExists` fault if it already exists.
    pub fn create_collection(&self, name: &str) -> MongoResult<Arc<dyn CollectionBackend>> {
        self.validate_collection_name(name)?;
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(MongoError::new(
                ErrorKind::NamespaceExists,
                format!("collection already exists: {}.{name}", self.name),
            ));
        }

        let collection = self.backend.open_collection(self.defaults.context(&self.name, name))?;
        collections.insert(name.to_string(), collection.clone());
        debug!(database = %self.name, collection = name, "created collection explicitly");
        Ok(collection)
    }

    /// Returns the collection named `name` if it exists.
    pub fn collection(&self, name: &str) -> Option<Arc<dyn CollectionBackend>> {
        self.collections.read().get(name).cloned()
    }

    /// A snapshot of the collections, in creation order.
    pub fn list_collections(&self) -> Vec<Arc<dyn CollectionBackend>> {
        self.collections.read().values().cloned().collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Drops the collection named `name` and its documents.
    ///
    /// Returns whether the collection existed.
    pub fn drop_collection(&self, name: &str) -> bool {
        let dropped = self.collections.write().shift_remove(name);
        match dropped {
            Some(collection) => {
                collection.clear();
                self.backend.drop_collection(&self.name, name);
                debug!(database = %self.name, collection = name, "dropped collection");
                true
            }
            None => false,
        }
    }

    /// Drops every collection.
    pub fn drop_all(&self) {
        let dropped = std::mem::take(&mut *self.collections.write());
        for (name, collection) in dropped {
            collection.clear();
            self.backend.drop_collection(&self.name, &name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }
}
