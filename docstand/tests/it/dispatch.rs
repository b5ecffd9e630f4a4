use bson::{Bson, Document, doc};
use docstand::prelude::*;

use crate::helpers::dispatcher;

fn reply_document(reply: &Reply) -> Document {
    reply.to_documents().remove(0)
}

#[test]
fn insert_find_update_delete_round() {
    let dispatcher = dispatcher();

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "insert": "orders", "documents": [{ "item": "tea", "qty": 1 }, { "item": "jam", "qty": 5 }] },
    );
    assert_eq!(reply_document(&reply), doc! { "n": 2, "ok": 1.0 });

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "find": "orders", "filter": { "qty": { "$gt": 2 } }, "projection": { "_id": 0 } },
    );
    assert_eq!(reply, Reply::Documents(vec![doc! { "item": "jam", "qty": 5 }]));

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "update": "orders", "updates": [
            { "q": { "item": "tea" }, "u": { "$inc": { "qty": 1 } } },
            { "q": { "item": "milk" }, "u": { "$set": { "qty": 1 } }, "upsert": true },
        ] },
    );
    assert_eq!(
        reply_document(&reply),
        doc! { "n": 2, "nModified": 1, "upserted": [{ "index": 1, "_id": 3_i64 }], "ok": 1.0 }
    );

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "delete": "orders", "deletes": [{ "q": { "qty": { "$lt": 5 } }, "limit": 0 }] },
    );
    assert_eq!(reply_document(&reply), doc! { "n": 2, "ok": 1.0 });

    let reply = dispatcher.handle_command("shop", &doc! { "count": "orders", "query": {} });
    assert_eq!(reply_document(&reply), doc! { "n": 1, "ok": 1.0 });
}

#[test]
fn unknown_commands_are_unsupported_replies() {
    let dispatcher = dispatcher();

    let reply = dispatcher.handle_command("shop", &doc! { "frobnicate": 1 });
    assert!(reply.is_unsupported());
    let rendered = reply_document(&reply);
    assert_eq!(rendered.get_i32("code").unwrap(), 59);
    assert_eq!(rendered.get_str("codeName").unwrap(), "CommandNotFound");
    assert_eq!(rendered.get_i32("ok").unwrap(), 0);

    // an existing collection does not know it either
    dispatcher.handle_command("shop", &doc! { "create": "orders" });
    let reply = dispatcher.handle_command("shop", &doc! { "compact": "orders" });
    assert!(reply.is_unsupported());

    let query = QueryEnvelope::new(
        "shop",
        "orders",
        QueryKind::Command {
            name: "mapReduce".to_string(),
            body: doc! { "mapReduce": "orders" },
        },
    );
    assert!(dispatcher.handle_query(query).is_unsupported());
}

#[test]
fn malformed_commands_fail_before_reaching_collections() {
    let dispatcher = dispatcher();

    let result = dispatcher.dispatch_command("shop", &doc! { "insert": "orders", "documents": "nope" });
    assert!(result.is_failed());
    assert_eq!(result.fault().map(MongoError::kind), Some(ErrorKind::MalformedCommand));

    // nothing was created on the way
    let database = dispatcher.store().database("shop").unwrap();
    assert!(database.collection("orders").is_none());

    let reply = dispatcher.handle_command("shop", &doc! {});
    assert_eq!(reply.fault().map(MongoError::kind), Some(ErrorKind::MalformedCommand));
}

fn error_kinds(reply: &Reply) -> Vec<(usize, ErrorKind)> {
    reply
        .write_errors()
        .iter()
        .map(|error| (error.index, error.fault.kind()))
        .collect()
}

#[test]
fn storage_faults_are_reported() {
    let dispatcher = dispatcher();
    dispatcher.handle_command("shop", &doc! { "insert": "orders", "documents": [{ "_id": 1 }] });

    let reply = dispatcher.handle_command("shop", &doc! { "insert": "orders", "documents": [{ "_id": 1 }] });
    assert!(!reply.is_error());
    assert_eq!(error_kinds(&reply), vec![(0, ErrorKind::DuplicateIdentity)]);
    let rendered = reply_document(&reply);
    assert_eq!(rendered.get_i32("n").unwrap(), 0);
    let error = rendered.get_array("writeErrors").unwrap()[0].as_document().unwrap().clone();
    assert_eq!(error.get_i32("code").unwrap(), 11000);

    let reply = dispatcher.handle_command("shop", &doc! { "find": "orders", "filter": { "a": { "$bogus": 1 } } });
    assert_eq!(reply.fault().map(MongoError::kind), Some(ErrorKind::UnsupportedOperator));

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "update": "orders", "updates": [{ "q": { "_id": 1 }, "u": { "$set": { "_id": 2 } } }] },
    );
    assert_eq!(error_kinds(&reply), vec![(0, ErrorKind::IdentityImmutable)]);
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 0);
}

#[test]
fn unordered_insert_keeps_going_after_a_fault() {
    let dispatcher = dispatcher();

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "insert": "orders", "documents": [{ "_id": 1 }, { "_id": 1 }, { "_id": 2 }], "ordered": false },
    );
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 2);
    assert_eq!(error_kinds(&reply), vec![(1, ErrorKind::DuplicateIdentity)]);
    let reply = dispatcher.handle_command("shop", &doc! { "count": "orders" });
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 2);

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "insert": "more", "documents": [{ "_id": 1 }, { "_id": 1 }, { "_id": 2 }] },
    );
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 1);
    assert_eq!(error_kinds(&reply), vec![(1, ErrorKind::DuplicateIdentity)]);
    let reply = dispatcher.handle_command("shop", &doc! { "count": "more" });
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 1);
}

#[test]
fn update_batches_stop_at_the_failing_statement() {
    let dispatcher = dispatcher();
    dispatcher.handle_command("shop", &doc! { "insert": "orders", "documents": [{ "_id": 1 }, { "_id": 2 }] });

    let reply = dispatcher.handle_command(
        "shop",
        &doc! { "update": "orders", "updates": [
            { "q": { "_id": 1 }, "u": { "$set": { "seen": true } } },
            { "q": { "_id": 2 }, "u": { "$set": { "_id": 5 } } },
            { "q": { "_id": 2 }, "u": { "$set": { "seen": true } } },
        ] },
    );
    let rendered = reply_document(&reply);
    assert_eq!(rendered.get_i32("n").unwrap(), 1);
    assert_eq!(rendered.get_i32("nModified").unwrap(), 1);
    assert_eq!(error_kinds(&reply), vec![(1, ErrorKind::IdentityImmutable)]);

    let reply = dispatcher.handle_command("shop", &doc! { "count": "orders", "query": { "seen": true } });
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 1);
}

#[test]
fn administrative_commands() {
    let dispatcher = dispatcher();

    assert_eq!(reply_document(&dispatcher.handle_command("admin", &doc! { "ping": 1 })), doc! { "ok": 1.0 });

    assert!(!dispatcher.handle_command("shop", &doc! { "create": "orders" }).is_error());
    let reply = dispatcher.handle_command("shop", &doc! { "create": "orders" });
    assert_eq!(reply.fault().map(MongoError::kind), Some(ErrorKind::NamespaceExists));

    dispatcher.handle_command("shop", &doc! { "insert": "items", "documents": [{}] });
    let reply = dispatcher.handle_command("shop", &doc! { "listCollections": 1 });
    let batch = reply_document(&reply)
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .filter_map(Bson::as_document)
        .map(|entry| entry.get_str("name").unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(batch, vec!["orders".to_string(), "items".to_string()]);

    let reply = dispatcher.handle_command("shop", &doc! { "drop": "orders" });
    assert_eq!(reply_document(&reply).get_str("ns").unwrap(), "shop.orders");
    let reply = dispatcher.handle_command("shop", &doc! { "drop": "orders" });
    assert_eq!(reply.fault().map(MongoError::kind), Some(ErrorKind::NamespaceNotFound));

    let reply = dispatcher.handle_command("shop", &doc! { "dropDatabase": 1 });
    assert_eq!(reply_document(&reply), doc! { "dropped": "shop", "ok": 1.0 });
    assert!(dispatcher.store().existing_database("shop").is_none());
}

#[test]
fn count_honors_skip_and_limit() {
    let dispatcher = dispatcher();
    dispatcher.handle_command("shop", &doc! { "insert": "c", "documents": [{}, {}, {}, {}, {}] });

    let reply = dispatcher.handle_command("shop", &doc! { "count": "c", "skip": 1, "limit": 3 });
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 3);
    let reply = dispatcher.handle_command("shop", &doc! { "count": "c", "skip": 4, "limit": 3 });
    assert_eq!(reply_document(&reply).get_i32("n").unwrap(), 1);
}

#[test]
fn envelopes_built_in_code_are_served() {
    let dispatcher = dispatcher();

    let reply = dispatcher.handle_query(QueryEnvelope::insert("shop", "c", vec![doc! { "v": 1 }, doc! { "v": 2 }]));
    assert_eq!(reply, Reply::Written(WriteOutcome { n: 2, modified: None, ..WriteOutcome::default() }));

    let reply = dispatcher.handle_query(QueryEnvelope::update(
        "shop",
        "c",
        doc! {},
        doc! { "$set": { "seen": true } },
        UpdateOptions::multi(),
    ));
    assert_eq!(reply, Reply::Written(WriteOutcome { n: 2, modified: Some(2), ..WriteOutcome::default() }));

    let options = FindOptions::builder().sort("v", SortDirection::Desc).limit(1).build();
    let reply = dispatcher.handle_query(QueryEnvelope::find("shop", "c", doc! { "seen": true }, options));
    assert_eq!(reply, Reply::Documents(vec![doc! { "_id": 2_i64, "v": 2, "seen": true }]));

    let reply = dispatcher.handle_query(QueryEnvelope::remove("shop", "c", doc! {}, Some(1)));
    assert_eq!(reply, Reply::Written(WriteOutcome { n: 1, modified: None, ..WriteOutcome::default() }));
}

#[tokio::test]
async fn query_handler_serves_asynchronously() {
    let dispatcher = docstand::in_memory(StoreConfig::default()).await.unwrap();

    let reply = dispatcher
        .serve_command("shop", &doc! { "insert": "orders", "documents": [{ "item": "tea" }] })
        .await;
    assert!(!reply.is_error());

    let reply = dispatcher
        .serve(QueryEnvelope::find("shop", "orders", doc! {}, FindOptions::default()))
        .await;
    let Reply::Documents(found) = reply else {
        panic!("expected documents, got {reply:?}");
    };
    assert_eq!(found.len(), 1);
    assert!(matches!(found[0].get("_id"), Some(Bson::ObjectId(_))));

    let reply = dispatcher.serve_command("shop", &doc! { "insert": 1 }).await;
    assert_eq!(reply.fault().map(MongoError::kind), Some(ErrorKind::MalformedCommand));

    let result = dispatcher
        .handle_query_async(QueryEnvelope::find("shop", "orders", doc! { "item": "tea" }, FindOptions::default()))
        .await
        .unwrap();
    assert_eq!(result.to_documents().len(), 1);
}
