#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use couchlayer::prelude::*;

pub async fn client() -> Client {
    Client::new(&Registry::with_defaults(), "memory", "").await.expect("create client")
}

pub async fn database(name: &str) -> Database {
    let client = client().await;
    client.create_db(name).await.expect("create database");
    client.db(name).await.expect("open database")
}

/// A driver handle exposing only the required operations, so every optional
/// one has to be emulated.
#[derive(Debug)]
pub struct BareDb(pub Arc<dyn Db>);

impl BareDb {
    pub async fn database(name: &str) -> Database {
        let native = database(name).await;
        Database::new(name, Arc::new(BareDb(native.driver_db().clone())))
    }
}

#[async_trait]
impl Db for BareDb {
    async fn all_docs(&self, options: AllDocsOptions) -> DriverResult<ResultSet> {
        self.0.all_docs(options).await
    }

    async fn get(&self, doc_id: &str, options: GetOptions) -> DriverResult<Value> {
        self.0.get(doc_id, options).await
    }

    async fn create_doc(&self, doc: Value) -> DriverResult<(String, RevId)> {
        self.0.create_doc(doc).await
    }

    async fn put(&self, doc_id: &str, doc: Value) -> DriverResult<RevId> {
        self.0.put(doc_id, doc).await
    }

    async fn delete(&self, doc_id: &str, rev: &RevId) -> DriverResult<RevId> {
        self.0.delete(doc_id, rev).await
    }

    async fn stats(&self) -> DriverResult<DbStats> {
        self.0.stats().await
    }

    async fn compact(&self) -> DriverResult<()> {
        self.0.compact().await
    }

    async fn compact_view(&self, ddoc: &str) -> DriverResult<()> {
        self.0.compact_view(ddoc).await
    }

    async fn view_cleanup(&self) -> DriverResult<()> {
        self.0.view_cleanup().await
    }

    async fn security(&self) -> DriverResult<Security> {
        self.0.security().await
    }

    async fn set_security(&self, security: Security) -> DriverResult<()> {
        self.0.set_security(security).await
    }

    async fn changes(&self, options: ChangesOptions) -> DriverResult<Box<dyn Changes>> {
        self.0.changes(options).await
    }

    async fn bulk_docs(&self, docs: Vec<Value>, options: BulkOptions) -> DriverResult<Vec<BulkResult>> {
        self.0.bulk_docs(docs, options).await
    }

    async fn put_attachment(&self, doc_id: &str, rev: Option<&RevId>, attachment: Attachment) -> DriverResult<RevId> {
        self.0.put_attachment(doc_id, rev, attachment).await
    }

    async fn get_attachment(&self, doc_id: &str, rev: Option<&RevId>, filename: &str) -> DriverResult<Attachment> {
        self.0.get_attachment(doc_id, rev, filename).await
    }

    async fn delete_attachment(&self, doc_id: &str, rev: &RevId, filename: &str) -> DriverResult<RevId> {
        self.0.delete_attachment(doc_id, rev, filename).await
    }

    async fn query(&self, ddoc: &str, view: &str, options: Value) -> DriverResult<ResultSet> {
        self.0.query(ddoc, view, options).await
    }
}
