use bson::{Bson, Document, doc, oid::ObjectId};
use docstand::{memory::MemoryBackend, prelude::*};

use crate::helpers::{collection, field_values};

fn all() -> FindOptions {
    FindOptions::default()
}

#[test]
fn generated_identity_is_placed_first() {
    let store = DocumentStore::new(MemoryBackend::new(), StoreConfig::default()).unwrap();
    let people = store.database("app").unwrap().get_or_create_collection("people").unwrap();

    let id = people.insert(doc! { "name": "Ada" }).unwrap();
    assert!(matches!(id, Bson::ObjectId(_)));

    let stored = people.find(&doc! {}, &all()).unwrap().to_vec().remove(0);
    assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    assert_eq!(stored.get("_id"), Some(&id));
}

#[test]
fn identity_derivation_on_insert() {
    let things = collection("things");

    assert_eq!(things.insert(doc! { "_id": 1, "a": 1 }).unwrap(), Bson::Int32(1));
    assert_eq!(things.insert(doc! { "_id": { "$in": [5, 6] } }).unwrap(), Bson::Int32(5));
    assert_eq!(things.insert(doc! { "_id": { "$in": [] } }).unwrap(), Bson::Int64(1));
    assert_eq!(things.insert(doc! { "a": 2 }).unwrap(), Bson::Int64(2));
    assert_eq!(things.len(), 4);
}

#[test]
fn duplicate_identity_leaves_collection_unchanged() {
    let things = collection("things");
    things.insert(doc! { "_id": "x", "v": 1 }).unwrap();

    let err = things.insert(doc! { "_id": "x", "v": 2 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    assert_eq!(err.kind().code(), 11000);
    assert_eq!(things.len(), 1);

    // numerically equal identities collide
    things.insert(doc! { "_id": 2 }).unwrap();
    let err = things.insert(doc! { "_id": 2.0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    assert_eq!(things.len(), 2);
}

#[test]
fn array_identity_is_rejected() {
    let things = collection("things");
    let err = things.insert(doc! { "_id": [1, 2] }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIdField);
    assert!(things.is_empty());
}

#[test]
fn find_returns_matches_in_insertion_order() {
    let things = collection("things");
    for a in [1, 2, 3] {
        things.insert(doc! { "a": a }).unwrap();
    }

    let cursor = things.find(&doc! { "a": { "$gt": 1 } }, &all()).unwrap();
    assert_eq!(field_values(&cursor, "a"), vec![Bson::Int32(2), Bson::Int32(3)]);

    // the cursor can be walked more than once
    assert_eq!(cursor.count(), 2);
    assert_eq!(cursor.iter().count(), 2);
}

#[test]
fn basic_filter_semantics() {
    let things = collection("things");
    things.insert(doc! { "_id": 1, "a": 1 }).unwrap();
    things.insert(doc! { "_id": 2 }).unwrap();
    things.insert(doc! { "_id": 3, "a": 2.0, "tags": ["red", "blue"] }).unwrap();

    let count = |filter: Document| things.count(&filter).unwrap();

    assert_eq!(count(doc! {}), 3);
    assert_eq!(count(doc! { "a": 1 }), 1);
    assert_eq!(count(doc! { "a": 5 }), 0);
    assert_eq!(count(doc! { "a": Bson::Null }), 1);
    assert_eq!(count(doc! { "a": { "$in": [1, 2, 3] } }), 2);
    assert_eq!(count(doc! { "a": { "$in": [5] } }), 0);
    assert_eq!(count(doc! { "a": 2 }), 1);
    assert_eq!(count(doc! { "a": { "$exists": false } }), 1);
    assert_eq!(count(doc! { "tags": "blue" }), 1);
    assert_eq!(count(doc! { "$or": [{ "a": 1 }, { "tags": "red" }] }), 2);
}

#[test]
fn unknown_operator_is_reported() {
    let things = collection("things");
    things.insert(doc! { "a": 1 }).unwrap();

    let err = things.find(&doc! { "a": { "$near": [0, 0] } }, &all()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperator);
    assert!(err.message().contains("$near"));

    let err = things.count(&doc! { "$where": "true" }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperator);
}

#[test]
fn sort_skip_limit_and_projection() {
    let things = collection("things");
    for (name, age) in [("c", 30), ("a", 20), ("d", 40), ("b", 25)] {
        things.insert(doc! { "name": name, "age": age, "secret": true }).unwrap();
    }

    let options = FindOptions::builder()
        .sort("age", SortDirection::Desc)
        .skip(1)
        .limit(2)
        .projection(doc! { "name": 1 })
        .build();
    let found = things.find(&doc! {}, &options).unwrap().to_vec();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].get_str("name").unwrap(), "c");
    assert_eq!(found[1].get_str("name").unwrap(), "b");
    assert!(found[0].contains_key("_id"));
    assert!(!found[0].contains_key("secret"));

    let err = things
        .find(&doc! {}, &FindOptions::builder().projection(doc! { "name": 1, "age": 0 }).build())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn operator_update_and_replacement() {
    let things = collection("things");
    things.insert(doc! { "_id": 1, "n": 1, "tags": ["a"] }).unwrap();

    let outcome = things
        .update(
            &doc! { "_id": 1 },
            &doc! { "$inc": { "n": 2 }, "$push": { "tags": "b" }, "$set": { "meta.seen": true } },
            &UpdateOptions::default(),
        )
        .unwrap();
    assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1, upserted_id: None });

    let stored = things.find(&doc! { "_id": 1 }, &all()).unwrap().to_vec().remove(0);
    assert_eq!(stored, doc! { "_id": 1, "n": 3, "tags": ["a", "b"], "meta": { "seen": true } });

    things
        .update(&doc! { "_id": 1 }, &doc! { "fresh": true }, &UpdateOptions::default())
        .unwrap();
    let stored = things.find(&doc! {}, &all()).unwrap().to_vec().remove(0);
    assert_eq!(stored, doc! { "_id": 1, "fresh": true });
}

#[test]
fn unchanged_documents_are_not_counted_as_modified() {
    let things = collection("things");
    things.insert(doc! { "_id": 1, "v": 1 }).unwrap();

    let outcome = things
        .update(&doc! { "v": 1 }, &doc! { "$set": { "v": 1 } }, &UpdateOptions::default())
        .unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.modified, 0);
}

#[test]
fn identity_cannot_change() {
    let things = collection("things");
    things.insert(doc! { "_id": 1, "v": 1 }).unwrap();

    for modification in [doc! { "$set": { "_id": 2 } }, doc! { "_id": 2, "v": 1 }, doc! { "$unset": { "_id": "" } }] {
        let err = things
            .update(&doc! { "_id": 1 }, &modification, &UpdateOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityImmutable);
    }

    let stored = things.find(&doc! {}, &all()).unwrap().to_vec();
    assert_eq!(stored, vec![doc! { "_id": 1, "v": 1 }]);
}

#[test]
fn failed_multi_update_changes_nothing() {
    let things = collection("things");
    things.insert(doc! { "_id": 1, "group": "g", "v": 1 }).unwrap();
    things.insert(doc! { "_id": 2, "group": "g", "v": "text" }).unwrap();

    let err = things
        .update(&doc! { "group": "g" }, &doc! { "$inc": { "v": 1 } }, &UpdateOptions::multi())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(things.count(&doc! { "v": 1 }).unwrap(), 1);

    let err = things
        .update(&doc! { "group": "g" }, &doc! { "v": 0 }, &UpdateOptions::multi())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn multi_update_touches_every_match() {
    let things = collection("things");
    for v in 1..=3 {
        things.insert(doc! { "v": v }).unwrap();
    }

    let outcome = things
        .update(&doc! { "v": { "$gte": 2 } }, &doc! { "$mul": { "v": 10 } }, &UpdateOptions::multi())
        .unwrap();
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.modified, 2);

    let cursor = things.find(&doc! {}, &all()).unwrap();
    assert_eq!(field_values(&cursor, "v"), vec![Bson::Int32(1), Bson::Int32(20), Bson::Int32(30)]);
}

#[test]
fn upsert_builds_from_filter() {
    let things = collection("things");

    let outcome = things
        .update(
            &doc! { "name": "tea", "qty": { "$gt": 5 } },
            &doc! { "$set": { "price": 3 }, "$setOnInsert": { "fresh": true } },
            &UpdateOptions::upsert(),
        )
        .unwrap();
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.upserted_id, Some(Bson::Int64(1)));

    let stored = things.find(&doc! {}, &all()).unwrap().to_vec().remove(0);
    assert_eq!(stored, doc! { "_id": 1_i64, "name": "tea", "price": 3, "fresh": true });

    // a second upsert matches the stored document and skips $setOnInsert
    let outcome = things
        .update(
            &doc! { "name": "tea" },
            &doc! { "$set": { "price": 4 }, "$setOnInsert": { "fresh": false } },
            &UpdateOptions::upsert(),
        )
        .unwrap();
    assert_eq!(outcome.upserted_id, None);
    assert_eq!(things.count(&doc! { "fresh": true, "price": 4 }).unwrap(), 1);
}

#[test]
fn upsert_takes_identity_from_in_operator() {
    let things = collection("things");
    let outcome = things
        .update(&doc! { "_id": { "$in": [7, 8] } }, &doc! { "$set": { "v": 1 } }, &UpdateOptions::upsert())
        .unwrap();
    assert_eq!(outcome.upserted_id, Some(Bson::Int32(7)));
}

#[test]
fn remove_with_and_without_limit() {
    let things = collection("things");
    for v in [1, 1, 1, 2] {
        things.insert(doc! { "v": v }).unwrap();
    }

    assert_eq!(things.remove(&doc! { "v": 1 }, Some(1)).unwrap(), 1);
    assert_eq!(things.count(&doc! { "v": 1 }).unwrap(), 2);
    assert_eq!(things.remove(&doc! { "v": 1 }, None).unwrap(), 2);
    assert_eq!(things.remove(&doc! { "v": 9 }, None).unwrap(), 0);
    assert_eq!(things.len(), 1);
}

#[test]
fn dollar_prefixed_fields_are_refused() {
    let things = collection("things");
    let err = things.insert(doc! { "$set": { "a": 1 } }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn unknown_collection_commands_are_unsupported() {
    let things = collection("things");
    let err = things.handle_command("reIndex", &doc! { "reIndex": "things" }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}

#[test]
fn custom_identity_field() {
    let config = StoreConfig::default().with_id_field("key");
    let store = DocumentStore::builder(MemoryBackend::new()).config(config).build().unwrap();
    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();

    let oid = ObjectId::new();
    assert_eq!(things.insert(doc! { "key": oid, "_id": 1 }).unwrap(), Bson::ObjectId(oid));
    let err = things.insert(doc! { "key": oid }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    assert_eq!(things.id_field(), "key");
}

#[test]
fn regex_values_in_filters_match_strings() {
    let people = collection("people");
    people.insert(doc! { "_id": "ada", "name": "Ada" }).unwrap();
    people.insert(doc! { "_id": "bob", "name": "Bob" }).unwrap();

    let starts_with_a = Bson::RegularExpression(bson::Regex {
        pattern: "^a".try_into().unwrap(),
        options: "i".try_into().unwrap(),
    });
    assert_eq!(people.count(&doc! { "name": starts_with_a.clone() }).unwrap(), 1);
    assert_eq!(people.count(&doc! { "_id": starts_with_a.clone() }).unwrap(), 1);
    assert_eq!(people.count(&doc! { "name": { "$nin": [starts_with_a] } }).unwrap(), 1);
}
