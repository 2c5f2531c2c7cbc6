mod common;

use std::sync::Arc;

use couchlayer_core::driver::Db;
use couchlayer_core::error::DriverError;
use couchlayer_core::options::{BulkOptions, GetOptions};
use couchlayer_core::revision::RevId;
use serde_json::{Value, json};

fn replicated(rev: &str, history: &[&str], body: Value) -> Value {
    let rev = RevId::parse(rev).unwrap();
    let mut doc = body;
    doc["_id"] = json!("a");
    doc["_rev"] = json!(rev.to_string());
    doc["_revisions"] = json!({ "start": rev.generation, "ids": history });
    doc
}

#[tokio::test]
async fn stale_parent_conflicts_and_winner_is_kept() {
    let (_client, db) = common::fresh_db("scenario").await;

    let first = db.put("a", json!({ "x": 1 })).await.unwrap();
    let second = db.put("a", json!({ "_rev": first.to_string(), "x": 2 })).await.unwrap();
    let stale = db.put("a", json!({ "_rev": first.to_string(), "x": 3 })).await;

    assert!(matches!(stale, Err(DriverError::Conflict(_))));

    let doc = db.get("a", GetOptions::default()).await.unwrap();
    assert_eq!(doc["x"], 2);
    assert_eq!(doc["_rev"], second.to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_with_the_same_parent() {
    for round in 0..20 {
        let (_client, db) = common::fresh_db("race").await;
        let parent = db.put("a", json!({ "x": 0 })).await.unwrap();

        let tasks = (1..=2)
            .map(|x| {
                let db: Arc<dyn Db> = db.clone();
                let body = json!({ "_rev": parent.to_string(), "x": x });
                tokio::spawn(async move { db.put("a", body).await })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        let wins = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(DriverError::Conflict(_))))
            .count();
        assert_eq!((wins, conflicts), (1, 1), "round {round}");

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.update_seq, 2, "round {round}");

        let winner = outcomes.into_iter().find_map(Result::ok).unwrap();
        assert_eq!(db.get("a", GetOptions::default()).await.unwrap()["_rev"], winner.to_string());
    }
}

#[tokio::test]
async fn winner_ignores_arrival_order() {
    let branches = [
        replicated("2-aaa", &["aaa", "root"], json!({ "branch": "a" })),
        replicated("3-ccc", &["ccc", "bbb", "root"], json!({ "branch": "c" })),
        replicated("3-ddd", &["ddd", "bbb", "root"], json!({ "branch": "d" })),
        replicated("4-eee", &["eee", "xxx", "aaa", "root"], json!({ "_deleted": true })),
    ];

    let mut winners = Vec::new();
    for rotation in 0..branches.len() {
        let (_client, db) = common::fresh_db("order").await;
        let mut docs = branches.to_vec();
        docs.rotate_left(rotation);

        let results = db.bulk_docs(docs, BulkOptions { new_edits: false }).await.unwrap();
        assert!(results.iter().all(|result| result.result.is_ok()));

        let doc = db.get("a", GetOptions { conflicts: true, ..Default::default() }).await.unwrap();
        winners.push((doc["_rev"].clone(), doc["_conflicts"].clone()));
    }

    for winner in &winners {
        assert_eq!(winner.0, "3-ddd");
        assert_eq!(winner.1, json!(["3-ccc"]));
    }
}

#[tokio::test]
async fn deleting_the_winner_promotes_a_conflict() {
    let (_client, db) = common::fresh_db("promote").await;
    let docs = vec![
        replicated("2-aaa", &["aaa", "root"], json!({ "branch": "a" })),
        replicated("2-bbb", &["bbb", "root"], json!({ "branch": "b" })),
    ];
    db.bulk_docs(docs, BulkOptions { new_edits: false }).await.unwrap();

    let winner = db.get("a", GetOptions::default()).await.unwrap();
    assert_eq!(winner["branch"], "b");

    db.delete("a", &RevId::new(2, "bbb")).await.unwrap();

    let doc = db.get("a", GetOptions::default()).await.unwrap();
    assert_eq!(doc["branch"], "a");
    assert_eq!(doc["_rev"], "2-aaa");
}

#[tokio::test]
async fn revision_history_is_reported() {
    let (_client, db) = common::fresh_db("history").await;

    let mut rev = db.put("a", json!({ "n": 0 })).await.unwrap();
    for n in 1..4 {
        rev = db.put("a", json!({ "_rev": rev.to_string(), "n": n })).await.unwrap();
    }

    let doc = db.get("a", GetOptions { revs: true, ..Default::default() }).await.unwrap();
    assert_eq!(doc["_revisions"]["start"], 4);
    assert_eq!(doc["_revisions"]["ids"].as_array().unwrap().len(), 4);
    assert_eq!(doc["_revisions"]["ids"][0], rev.hash);
}

#[tokio::test]
async fn exhausted_generations_reject_further_edits() {
    let (_client, db) = common::fresh_db("exhausted").await;
    let last = format!("{}-abc", u64::MAX);

    let grafted = db
        .bulk_docs(vec![json!({ "_id": "a", "_rev": last })], BulkOptions { new_edits: false })
        .await
        .unwrap();
    assert!(grafted[0].result.is_ok());

    let edit = db.put("a", json!({ "_rev": last, "x": 1 })).await;
    assert!(matches!(edit, Err(DriverError::BadRequest(_))));

    let removal = db.delete("a", &RevId::new(u64::MAX, "abc")).await;
    assert!(matches!(removal, Err(DriverError::BadRequest(_))));
    assert_eq!(db.get("a", GetOptions::default()).await.unwrap()["_rev"], last);
}
