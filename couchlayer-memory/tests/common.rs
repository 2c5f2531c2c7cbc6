#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use couchlayer_core::changes::Changes;
use couchlayer_core::driver::{Client, Db, Driver};
use couchlayer_core::types::Change;
use couchlayer_memory::MemoryDriver;

pub async fn client() -> Box<dyn Client> {
    MemoryDriver::new().new_client("memory://test").await.expect("create client")
}

pub async fn fresh_db(name: &str) -> (Box<dyn Client>, Arc<dyn Db>) {
    let client = client().await;
    client.create_db(name).await.expect("create database");
    let db = client.db(name).await.expect("open database");
    (client, db)
}

/// Awaits the next change, failing the test if none arrives in time.
pub async fn next_change(feed: &mut Box<dyn Changes>) -> Change {
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("change arrived in time")
        .expect("feed error")
        .expect("feed still open")
}

/// Drains a non-continuous feed.
pub async fn drain(mut feed: Box<dyn Changes>) -> Vec<Change> {
    let mut changes = Vec::new();
    while let Some(change) = feed.next().await.expect("feed error") {
        changes.push(change);
    }
    changes
}
