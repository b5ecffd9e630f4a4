//! Main document store interface.
//!
//! A [`DocumentStore`] owns the databases of one server instance, the storage
//! backend their collections live in, and the components (identity generator,
//! operator registries) every collection is built with.
//!
//! # Example
//!
//! ```ignore
//! use docstand::{prelude::*, memory::MemoryBackend};
//!
//! let store = DocumentStore::new(MemoryBackend::new(), StoreConfig::default())?;
//! let orders = store.database("shop")?.get_or_create_collection("orders")?;
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    backend::StorageBackend,
    config::StoreConfig,
    database::{CollectionDefaults, Database},
    error::{MongoError, MongoResult},
    identity::{IdentityDeriver, IdentityGenerator},
    matcher::{FilterMatcher, OperatorRegistry},
    update::{UpdateRegistry, Updater},
};


/// The registry of databases of one server instance.
///
/// Databases are created on first reference, like collections.
#[derive(Debug)]
pub struct DocumentStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    defaults: CollectionDefaults,
    databases: RwLock<IndexMap<String, Arc<Database>>>,
}

impl DocumentStore {
    /// Creates a store with the built-in operators and the generator
    /// selected by `config`.
    ///
    /// # Arguments
    ///
    /// * `backend` - Storage backend providing the collections
    /// * `config` - Store settings; see [`StoreConfig`]
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault if the configuration is invalid.
    pub fn new<B: StorageBackend + 'static>(backend: B, config: StoreConfig) -> MongoResult<Self> {
        Self::builder(backend).config(config).build()
    }

    /// Starts building a store with custom components.
    pub fn builder<B: StorageBackend + 'static>(backend: B) -> DocumentStoreBuilder {
        DocumentStoreBuilder::new(Arc::new(backend))
    }

    fn assemble(
        backend: Arc<dyn StorageBackend>,
        config: StoreConfig,
        generator: Arc<dyn IdentityGenerator>,
        operators: Arc<OperatorRegistry>,
        updates: Arc<UpdateRegistry>,
    ) -> Self {
        let matcher = FilterMatcher::new(operators);
        let defaults = CollectionDefaults {
            deriver: IdentityDeriver::new(config.id_field.clone(), generator),
            updater: Updater::new(updates, matcher.clone()),
            matcher,
            max_namespace_length: config.max_namespace_length,
        };

        info!(backend = backend.name(), id_field = %config.id_field, "document store ready");
        Self {
            backend,
            config,
            defaults,
            databases: RwLock::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn id_field(&self) -> &str {
        &self.config.id_field
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Returns the database named `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault for empty names and names containing any of
    /// `/\. "$` or NUL.
    pub fn database(&self, name: &str) -> MongoResult<Arc<Database>> {
        if let Some(database) = self.databases.read().get(name) {
            return Ok(database.clone());
        }

        validate_database_name(name)?;
        let mut databases = self.databases.write();
        let database = databases
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = name, "created database");
                Arc::new(Database::new(name, self.backend.clone(), self.defaults.clone()))
            })
            .clone();
        Ok(database)
    }

    /// Returns the database named `name` if it exists.
    pub fn existing_database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.read().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Drops the database named `name` with all its collections.
    ///
    /// Returns whether the database existed.
    pub fn drop_database(&self, name: &str) -> bool {
        let dropped = self.databases.write().shift_remove(name);
        match dropped {
            Some(database) => {
                database.drop_all();
                debug!(database = name, "dropped database");
                true
            }
            None => false,
        }
    }
}

fn validate_database_name(name: &str) -> MongoResult<()> {
    if name.is_empty() {
        return Err(MongoError::bad_value("database name cannot be empty"));
    }
    if let Some(illegal) = name.chars().find(|c| "/\\. \"$\0".contains(*c)) {
        return Err(MongoError::bad_value(format!(
            "database name '{name}' contains an invalid character: {illegal:?}"
        )));
    }
    Ok(())
}

/// Builder for a [`DocumentStore`] with injected components.
///
/// # Example
///
/// ```ignore
/// let store = DocumentStore::builder(MemoryBackend::new())
///     .config(StoreConfig::default())
///     .generator(Arc::new(SequentialGenerator::new(1)))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct DocumentStoreBuilder {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    generator: Option<Arc<dyn IdentityGenerator>>,
    operators: Option<Arc<OperatorRegistry>>,
    updates: Option<Arc<UpdateRegistry>>,
}

impl DocumentStoreBuilder {
    fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            config: StoreConfig::default(),
            generator: None,
            operators: None,
            updates: None,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the generator selected by the configuration.
    pub fn generator(mut self, generator: Arc<dyn IdentityGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the filter operators collections understand.
    pub fn operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = Some(Arc::new(operators));
        self
    }

    /// Sets the update operators collections understand.
    pub fn updates(mut self, updates: UpdateRegistry) -> Self {
        self.updates = Some(Arc::new(updates));
        self
    }

    /// Builds the store.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault if the configuration is invalid.
    pub fn build(self) -> MongoResult<DocumentStore> {
        self.config.validate()?;
        let generator = self
            .generator
            .unwrap_or_else(|| self.config.identity.generator());

        Ok(DocumentStore::assemble(
            self.backend,
            self.config,
            generator,
            self.operators.unwrap_or_default(),
            self.updates.unwrap_or_default(),
        ))
    }
}
