use std::{sync::Arc, thread};

use bson::doc;
use docstand::prelude::*;

use crate::helpers::{dispatcher, sequential_store};

const THREADS: usize = 8;
const PER_THREAD: usize = 250;

#[test]
fn concurrent_inserts_lose_nothing() {
    let store = sequential_store();
    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let things = things.clone();
            scope.spawn(move || {
                for n in 0..PER_THREAD {
                    let id = (worker * PER_THREAD + n) as i64;
                    things.insert(doc! { "_id": id, "worker": worker as i32 }).unwrap();
                }
            });
        }
    });

    assert_eq!(things.len(), THREADS * PER_THREAD);
    for worker in 0..THREADS {
        assert_eq!(things.count(&doc! { "worker": worker as i32 }).unwrap(), PER_THREAD as u64);
    }
}

#[test]
fn generated_identities_never_collide_across_threads() {
    let store = sequential_store();
    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let things = things.clone();
            scope.spawn(move || {
                for _ in 0..PER_THREAD {
                    things.insert(doc! { "generated": true }).unwrap();
                }
            });
        }
    });

    assert_eq!(things.count(&doc! { "generated": true }).unwrap(), (THREADS * PER_THREAD) as u64);
}

#[test]
fn racing_duplicate_inserts_admit_exactly_one() {
    let store = sequential_store();
    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();

    let outcomes = thread::scope(|scope| {
        let handles = (0..THREADS)
            .map(|worker| {
                let things = things.clone();
                scope.spawn(move || things.insert(doc! { "_id": "shared", "worker": worker as i32 }))
            })
            .collect::<Vec<_>>();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|fault| fault.kind() == ErrorKind::DuplicateIdentity)
    );
    assert_eq!(things.len(), 1);
}

#[test]
fn first_access_races_create_one_collection() {
    let store = Arc::new(sequential_store());

    let collections = thread::scope(|scope| {
        let handles = (0..THREADS)
            .map(|_| {
                let store = store.clone();
                scope.spawn(move || {
                    store
                        .database("app")
                        .unwrap()
                        .get_or_create_collection("contended")
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>()
    });

    assert!(collections.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(store.database("app").unwrap().collection_names().len(), 1);
}

#[test]
fn readers_see_whole_updates() {
    let store = sequential_store();
    let things = store.database("app").unwrap().get_or_create_collection("things").unwrap();
    for _ in 0..100 {
        things.insert(doc! { "round": 0 }).unwrap();
    }

    thread::scope(|scope| {
        let writer = things.clone();
        scope.spawn(move || {
            for _ in 0..50 {
                writer
                    .update(&doc! {}, &doc! { "$inc": { "round": 1 } }, &UpdateOptions::multi())
                    .unwrap();
            }
        });

        for _ in 0..4 {
            let reader = things.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let cursor = reader.find(&doc! {}, &FindOptions::default()).unwrap();
                    let rounds = cursor
                        .iter()
                        .map(|document| document.get_i32("round").unwrap())
                        .collect::<Vec<_>>();
                    assert!(rounds.windows(2).all(|pair| pair[0] == pair[1]), "torn read: {rounds:?}");
                }
            });
        }
    });

    assert_eq!(things.count(&doc! { "round": 50 }).unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_serves_concurrent_connections() {
    let dispatcher = dispatcher();

    let tasks = (0..16)
        .map(|connection| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for n in 0..25 {
                    let command = doc! {
                        "insert": "events",
                        "documents": [{ "connection": connection, "n": n }],
                    };
                    let reply = dispatcher.serve_command("log", &command).await;
                    assert!(!reply.is_error(), "{reply:?}");
                }
            })
        })
        .collect::<Vec<_>>();

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let reply = dispatcher.handle_command("log", &doc! { "count": "events" });
    assert_eq!(reply.to_documents()[0].get_i32("n").unwrap(), 400);
}
