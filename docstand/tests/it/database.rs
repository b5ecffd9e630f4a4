use std::sync::Arc;

use bson::doc;
use docstand::{backend::StoreBackendBuilder, memory::MemoryBackend, prelude::*};

use crate::helpers::sequential_store;

#[test]
fn collections_are_created_on_first_reference() {
    let store = sequential_store();
    let database = store.database("app").unwrap();
    assert!(database.is_empty());

    let first = database.get_or_create_collection("users").unwrap();
    let second = database.get_or_create_collection("users").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    first.insert(doc! { "name": "Ada" }).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(first.namespace(), "app.users");
    assert_eq!(database.collection_names(), vec!["users".to_string()]);
}

#[test]
fn explicit_creation_rejects_existing_collections() {
    let database = sequential_store().database("app").unwrap();
    database.create_collection("logs").unwrap();

    let err = database.create_collection("logs").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NamespaceExists);
}

#[test]
fn invalid_collection_names_are_rejected() {
    let config = StoreConfig {
        max_namespace_length: 10,
        ..StoreConfig::default()
    };
    let store = DocumentStore::builder(MemoryBackend::new()).config(config).build().unwrap();
    let database = store.database("app").unwrap();

    for name in ["", "a$b", "nul\0l", "much_too_long"] {
        let err = database.get_or_create_collection(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadValue, "{name:?}");
    }
    assert!(database.get_or_create_collection("short").is_ok());
}

#[test]
fn dropping_a_collection_discards_its_documents() {
    let database = sequential_store().database("app").unwrap();
    let users = database.get_or_create_collection("users").unwrap();
    users.insert(doc! { "name": "Ada" }).unwrap();

    assert!(database.drop_collection("users"));
    assert!(!database.drop_collection("users"));
    assert!(database.collection("users").is_none());

    let recreated = database.get_or_create_collection("users").unwrap();
    assert!(recreated.is_empty());
}

#[test]
fn store_manages_databases() {
    let store = sequential_store();
    let first = store.database("one").unwrap();
    let again = store.database("one").unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    store.database("two").unwrap();
    assert_eq!(store.database_names(), vec!["one".to_string(), "two".to_string()]);

    assert!(store.drop_database("one"));
    assert!(!store.drop_database("one"));
    assert!(store.existing_database("one").is_none());

    for name in ["", "a.b", "a b", "a/b", "a$b"] {
        assert_eq!(store.database(name).unwrap_err().kind(), ErrorKind::BadValue, "{name:?}");
    }
}

#[test]
fn backend_tracks_open_namespaces() {
    let backend = MemoryBackend::new();
    let store = DocumentStore::new(backend.clone(), StoreConfig::default()).unwrap();
    let database = store.database("app").unwrap();

    database.get_or_create_collection("a").unwrap();
    database.get_or_create_collection("b").unwrap();
    assert_eq!(backend.namespaces(), vec!["app.a".to_string(), "app.b".to_string()]);

    database.drop_collection("a");
    assert_eq!(backend.namespaces(), vec!["app.b".to_string()]);
}

#[tokio::test]
async fn store_from_built_backend_and_json_config() {
    let backend = MemoryBackend::builder().initial_capacity(16).build().await.unwrap();
    let config = StoreConfig::from_json_str(r#"{ "identity": { "type": "uuid" } }"#).unwrap();
    let store = DocumentStore::builder(backend).config(config).build().unwrap();
    assert_eq!(store.backend_name(), "memory");

    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();
    let id = things.insert(doc! {}).unwrap();
    assert!(matches!(id, bson::Bson::Binary(ref binary) if binary.bytes.len() == 16));
}

#[test]
fn custom_filter_operators_can_be_registered() {
    use bson::Bson;
    use docstand::{
        matcher::{Condition, FieldOperator},
        value::as_i64,
    };

    #[derive(Debug)]
    struct Even;

    impl FieldOperator for Even {
        fn token(&self) -> &'static str {
            "$even"
        }

        fn compile(&self, operand: &Bson, _: &bson::Document, _: &FilterMatcher) -> MongoResult<Condition> {
            let wanted = operand.as_bool().unwrap_or(true);
            Ok(Box::new(move |candidates: &[&Bson]| {
                candidates
                    .iter()
                    .any(|value| as_i64(value).map(|n| (n % 2 == 0) == wanted).unwrap_or(false))
            }))
        }
    }

    let mut operators = OperatorRegistry::with_builtins();
    operators.register(Even);
    let store = DocumentStore::builder(MemoryBackend::new())
        .operators(operators)
        .build()
        .unwrap();

    let numbers = store.database("app").unwrap().get_or_create_collection("numbers").unwrap();
    for n in 1..=5 {
        numbers.insert(doc! { "n": n }).unwrap();
    }
    assert_eq!(numbers.count(&doc! { "n": { "$even": true } }).unwrap(), 2);
    assert_eq!(numbers.count(&doc! { "n": { "$even": true, "$gt": 2 } }).unwrap(), 1);
}

#[test]
fn invalid_configuration_is_refused() {
    let config = StoreConfig::default().with_id_field("a.b");
    let err = DocumentStore::new(MemoryBackend::new(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);

    let config = StoreConfig { max_namespace_length: 0, ..StoreConfig::default() };
    assert!(DocumentStore::new(MemoryBackend::new(), config).is_err());

    let config = StoreConfig::default().with_id_field("key");
    let store = DocumentStore::new(MemoryBackend::new(), config).unwrap();
    assert_eq!(store.id_field(), "key");
}
