//! Store configuration.
//!
//! ```ignore
//! use docstand_core::config::{IdentityScheme, StoreConfig};
//!
//! let config = StoreConfig::from_json_str(r#"{ "identity": { "type": "sequential", "seed": 1 } }"#)?;
//! assert_eq!(config.id_field, "_id");
//! assert_eq!(config.identity, IdentityScheme::Sequential { seed: 1 });
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{MongoError, MongoResult},
    identity::{IdentityGenerator, ObjectIdGenerator, SequentialGenerator, UuidGenerator},
};


fn default_id_field() -> String {
    "_id".to_string()
}

fn default_max_namespace_length() -> usize {
    120
}

/// How identities are generated for documents that do not carry one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityScheme {
    /// 12-byte object ids.
    #[default]
    ObjectId,
    /// Random UUIDs.
    Uuid,
    /// Consecutive integers starting at `seed`.
    Sequential { seed: i64 },
}

impl IdentityScheme {
    pub fn generator(&self) -> Arc<dyn IdentityGenerator> {
        match self {
            IdentityScheme::ObjectId => Arc::new(ObjectIdGenerator::new()),
            IdentityScheme::Uuid => Arc::new(UuidGenerator),
            IdentityScheme::Sequential { seed } => Arc::new(SequentialGenerator::new(*seed)),
        }
    }
}

/// Settings shared by every database and collection of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the identity field.
    pub id_field: String,
    /// Identity generation scheme.
    pub identity: IdentityScheme,
    /// Upper bound for `database.collection` names.
    pub max_namespace_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            identity: IdentityScheme::default(),
            max_namespace_length: default_max_namespace_length(),
        }
    }
}

impl StoreConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a `BadValue` fault for malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> MongoResult<Self> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values no store can work with.
    pub fn validate(&self) -> MongoResult<()> {
        if self.id_field.is_empty() || self.id_field.contains('.') || self.id_field.starts_with('$') {
            return Err(MongoError::bad_value(format!(
                "invalid configuration: '{}' cannot be used as identity field",
                self.id_field
            )));
        }
        if self.max_namespace_length == 0 {
            return Err(MongoError::bad_value(
                "invalid configuration: max_namespace_length must be positive",
            ));
        }
        Ok(())
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_identity(mut self, identity: IdentityScheme) -> Self {
        self.identity = identity;
        self
    }
}
