use std::sync::Arc;

use docstand::{memory::MemoryBackend, prelude::*};

/// A store whose generated identities are 1, 2, 3, ...
pub fn sequential_store() -> DocumentStore {
    let config = StoreConfig::default().with_identity(IdentityScheme::Sequential { seed: 1 });
    DocumentStore::new(MemoryBackend::new(), config).unwrap()
}

pub fn collection(name: &str) -> Arc<dyn CollectionBackend> {
    sequential_store()
        .database("test")
        .unwrap()
        .get_or_create_collection(name)
        .unwrap()
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(sequential_store()))
}

/// Values of `field` in the documents of `cursor`, in cursor order.
pub fn field_values(cursor: &Cursor, field: &str) -> Vec<bson::Bson> {
    cursor
        .iter()
        .map(|document| document.get(field).cloned().unwrap_or(bson::Bson::Null))
        .collect()
}
