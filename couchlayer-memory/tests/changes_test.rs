mod common;

use std::sync::Arc;
use std::time::Duration;

use couchlayer_core::changes::into_stream;
use couchlayer_core::driver::Db;
use couchlayer_core::error::DriverError;
use couchlayer_core::options::ChangesOptions;
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn replay_reports_every_commit_once_in_order() {
    let (_client, db) = common::fresh_db("replay").await;

    let a1 = db.put("a", json!({ "x": 1 })).await.unwrap();
    let b1 = db.put("b", json!({ "x": 1 })).await.unwrap();
    let a2 = db.put("a", json!({ "_rev": a1.to_string(), "x": 2 })).await.unwrap();
    let b2 = db.delete("b", &b1).await.unwrap();

    let changes = common::drain(db.changes(ChangesOptions::default()).await.unwrap()).await;

    let seen = changes
        .iter()
        .map(|change| (change.seq, change.id.as_str(), change.rev.clone(), change.deleted))
        .collect::<Vec<_>>();
    assert_eq!(
        seen,
        vec![
            (1, "a", a1, false),
            (2, "b", b1, false),
            (3, "a", a2, false),
            (4, "b", b2, true),
        ]
    );

    let tail = common::drain(db.changes(ChangesOptions { since: 2, ..Default::default() }).await.unwrap()).await;
    assert_eq!(tail.iter().map(|change| change.seq).collect::<Vec<_>>(), vec![3, 4]);

    let limited = common::drain(db.changes(ChangesOptions { limit: Some(1), ..Default::default() }).await.unwrap()).await;
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn include_docs_returns_the_current_winner() {
    let (_client, db) = common::fresh_db("docs").await;
    let rev = db.put("a", json!({ "x": 1 })).await.unwrap();
    db.put("a", json!({ "_rev": rev.to_string(), "x": 2 })).await.unwrap();

    let options = ChangesOptions { include_docs: true, ..Default::default() };
    let changes = common::drain(db.changes(options).await.unwrap()).await;

    assert_eq!(changes.len(), 2);
    for change in changes {
        assert_eq!(change.doc.unwrap()["x"], 2);
    }
}

#[tokio::test]
async fn non_continuous_feed_ignores_later_commits() {
    let (_client, db) = common::fresh_db("snapshot").await;
    db.put("a", json!({})).await.unwrap();

    let mut feed = db.changes(ChangesOptions::default()).await.unwrap();
    db.put("b", json!({})).await.unwrap();

    assert_eq!(feed.next().await.unwrap().unwrap().id, "a");
    assert!(feed.next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn continuous_feed_wakes_on_commit() {
    let (_client, db) = common::fresh_db("live").await;
    db.put("before", json!({})).await.unwrap();

    let mut feed = db.changes(ChangesOptions::continuous(0)).await.unwrap();
    assert_eq!(common::next_change(&mut feed).await.id, "before");

    let writer: Arc<dyn Db> = db.clone();
    let producer = tokio::spawn(async move {
        for n in 0..10 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            writer.put(&format!("doc{n}"), json!({ "n": n })).await.unwrap();
        }
    });

    let mut last = 1;
    for n in 0..10 {
        let change = common::next_change(&mut feed).await;
        assert_eq!(change.id, format!("doc{n}"));
        assert!(change.seq > last);
        last = change.seq;
    }

    producer.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_produce_dense_sequences() {
    let (_client, db) = common::fresh_db("dense").await;

    let tasks = (0..8)
        .map(|writer| {
            let db: Arc<dyn Db> = db.clone();
            tokio::spawn(async move {
                for n in 0..25 {
                    db.put(&format!("w{writer}-{n}"), json!({})).await.unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.unwrap();
    }

    let changes = common::drain(db.changes(ChangesOptions::default()).await.unwrap()).await;
    let seqs = changes.iter().map(|change| change.seq).collect::<Vec<_>>();

    assert_eq!(seqs, (1..=200).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_a_feed_cancels_a_blocked_consumer() {
    let (_client, db) = common::fresh_db("close").await;

    let mut feed = db.changes(ChangesOptions::continuous(0)).await.unwrap();
    let handle = feed.close_handle();

    let consumer = tokio::spawn(async move { feed.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.close();

    let outcome = tokio::time::timeout(Duration::from_secs(5), consumer).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(DriverError::Canceled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroying_the_database_fails_open_feeds() {
    let (client, db) = common::fresh_db("doomed").await;

    let mut feed = db.changes(ChangesOptions::continuous(0)).await.unwrap();
    let consumer = tokio::spawn(async move { feed.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.destroy_db("doomed").await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), consumer).await.unwrap().unwrap();
    assert!(outcome.unwrap_err().is_not_found());
}

#[tokio::test]
async fn feeds_adapt_to_streams() {
    let (_client, db) = common::fresh_db("stream").await;
    for id in ["a", "b", "c"] {
        db.put(id, json!({})).await.unwrap();
    }

    let ids = into_stream(db.changes(ChangesOptions::default()).await.unwrap())
        .map(|change| change.unwrap().id)
        .collect::<Vec<_>>()
        .await;

    assert_eq!(ids, vec!["a", "b", "c"]);
}
