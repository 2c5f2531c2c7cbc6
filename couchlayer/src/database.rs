//! Database handle with capability emulation.
//!
//! A [`Database`] wraps a driver's [`Db`] together with the [`Capabilities`]
//! it advertised when the handle was opened. Optional operations go to the
//! driver when it supports them and fall back to equivalent sequences of
//! required operations otherwise:
//!
//! | operation             | fallback                                     |
//! |-----------------------|----------------------------------------------|
//! | [`Database::rev`]     | `get`, reading `_rev`                        |
//! | [`Database::copy`]    | `get` with inline attachments, then `put`    |
//! | [`Database::get_attachment_meta`] | `get_attachment`, discarding the content |
//! | [`Database::find`], [`Database::flush`] | none, `NotImplemented`     |

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use couchlayer_core::{
    attachment::{Attachment, AttachmentMeta},
    changes::Changes,
    document::{Document, DocumentExt, body_rev, set_body_rev},
    driver::{Capabilities, Capability, Db, Finder},
    error::{DriverError, DriverResult},
    find::{FindQuery, IndexDefinition},
    options::{AllDocsOptions, BulkOptions, ChangesOptions, CopyOptions, GetOptions},
    revision::RevId,
    rows::ResultSet,
    types::{BulkResult, DbStats, Index, Security},
};

/// Members a copy must not carry over from its source.
const COPY_EXCLUDED: [&str; 5] = ["_id", "_rev", "_revisions", "_conflicts", "_deleted"];

/// A handle to one database.
///
/// # Example
///
/// ```ignore
/// let db = client.db("animals").await?;
///
/// // Answered by the driver or emulated through `get`.
/// let rev = db.rev("cow").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    inner: Arc<dyn Db>,
    capabilities: Capabilities,
}

impl Database {
    /// Wraps a driver handle, recording its capabilities.
    pub fn new(name: impl Into<String>, inner: Arc<dyn Db>) -> Self {
        let capabilities = inner.capabilities();

        Self {
            name: name.into(),
            inner,
            capabilities,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capabilities the driver supports natively.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// The underlying driver handle.
    pub fn driver_db(&self) -> &Arc<dyn Db> {
        &self.inner
    }

    fn missing_capability(&self, capability: Capability) -> DriverError {
        DriverError::NotImplemented(format!("{capability:?} is not supported for database {}", self.name))
    }

    fn finder(&self) -> DriverResult<&dyn Finder> {
        self.inner
            .as_finder()
            .ok_or_else(|| self.missing_capability(Capability::Find))
    }

    pub async fn all_docs(&self, options: AllDocsOptions) -> DriverResult<ResultSet> {
        self.inner.all_docs(options).await
    }

    /// Fetches a document body, with `_id` and `_rev` injected.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotFound`] for missing or deleted documents.
    pub async fn get(&self, doc_id: &str, options: GetOptions) -> DriverResult<Value> {
        self.inner.get(doc_id, options).await
    }

    /// Fetches the winning revision of a document as a typed value.
    pub async fn get_doc<D: Document>(&self, doc_id: &str) -> DriverResult<D> {
        D::from_body(self.get(doc_id, GetOptions::default()).await?)
    }

    /// Creates a document, generating an id when the body has none.
    pub async fn create_doc(&self, doc: Value) -> DriverResult<(String, RevId)> {
        self.inner.create_doc(doc).await
    }

    /// Writes a document. The body's `_rev`, if any, names the parent revision.
    ///
    /// # Errors
    ///
    /// [`DriverError::Conflict`] if the parent is not the current winner.
    pub async fn put(&self, doc_id: &str, doc: Value) -> DriverResult<RevId> {
        self.inner.put(doc_id, doc).await
    }

    /// Writes a typed document under its own id.
    pub async fn put_doc<D: Document>(&self, doc: &D) -> DriverResult<RevId> {
        self.put(doc.id(), doc.to_body()?).await
    }

    pub async fn delete(&self, doc_id: &str, rev: &RevId) -> DriverResult<RevId> {
        self.inner.delete(doc_id, rev).await
    }

    pub async fn stats(&self) -> DriverResult<DbStats> {
        self.inner.stats().await
    }

    pub async fn compact(&self) -> DriverResult<()> {
        self.inner.compact().await
    }

    pub async fn compact_view(&self, ddoc: &str) -> DriverResult<()> {
        self.inner.compact_view(ddoc).await
    }

    pub async fn view_cleanup(&self) -> DriverResult<()> {
        self.inner.view_cleanup().await
    }

    pub async fn security(&self) -> DriverResult<Security> {
        self.inner.security().await
    }

    pub async fn set_security(&self, security: Security) -> DriverResult<()> {
        self.inner.set_security(security).await
    }

    /// Opens a change feed.
    pub async fn changes(&self, options: ChangesOptions) -> DriverResult<Box<dyn Changes>> {
        self.inner.changes(options).await
    }

    /// Applies many writes; each document succeeds or fails on its own.
    pub async fn bulk_docs(&self, docs: Vec<Value>, options: BulkOptions) -> DriverResult<Vec<BulkResult>> {
        self.inner.bulk_docs(docs, options).await
    }

    pub async fn put_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        attachment: Attachment,
    ) -> DriverResult<RevId> {
        self.inner.put_attachment(doc_id, rev, attachment).await
    }

    pub async fn get_attachment(&self, doc_id: &str, rev: Option<&RevId>, filename: &str) -> DriverResult<Attachment> {
        self.inner.get_attachment(doc_id, rev, filename).await
    }

    pub async fn delete_attachment(&self, doc_id: &str, rev: &RevId, filename: &str) -> DriverResult<RevId> {
        self.inner.delete_attachment(doc_id, rev, filename).await
    }

    pub async fn query(&self, ddoc: &str, view: &str, options: Value) -> DriverResult<ResultSet> {
        self.inner.query(ddoc, view, options).await
    }

    /// Runs a selector query.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotImplemented`] if the driver cannot run queries.
    pub async fn find(&self, query: FindQuery) -> DriverResult<ResultSet> {
        self.finder()?.find(query).await
    }

    pub async fn create_index(
        &self,
        ddoc: Option<&str>,
        name: Option<&str>,
        index: IndexDefinition,
    ) -> DriverResult<()> {
        self.finder()?.create_index(ddoc, name, index).await
    }

    pub async fn get_indexes(&self) -> DriverResult<Vec<Index>> {
        self.finder()?.get_indexes().await
    }

    pub async fn delete_index(&self, ddoc: &str, name: &str) -> DriverResult<()> {
        self.finder()?.delete_index(ddoc, name).await
    }

    /// Returns the winning revision of a document.
    ///
    /// Without native support this reads the whole document.
    pub async fn rev(&self, doc_id: &str) -> DriverResult<RevId> {
        if let Some(rever) = self.inner.as_rever() {
            return rever.rev(doc_id).await;
        }

        debug!(db = %self.name, doc_id, "emulating rev through get");
        let doc = self.get(doc_id, GetOptions::default()).await?;
        body_rev(&doc)?.ok_or_else(|| DriverError::NotFound(format!("{doc_id}: no revision")))
    }

    /// Returns attachment metadata.
    ///
    /// Without native support this downloads the attachment and discards the
    /// content after hashing it.
    pub async fn get_attachment_meta(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<AttachmentMeta> {
        if let Some(metaer) = self.inner.as_attachment_metaer() {
            return metaer.get_attachment_meta(doc_id, rev, filename).await;
        }

        debug!(db = %self.name, doc_id, filename, "emulating attachment meta through get_attachment");
        let attachment = self.get_attachment(doc_id, rev, filename).await?;
        let length = attachment.bytes()?.len() as u64;

        Ok(AttachmentMeta {
            digest: attachment.digest()?,
            content_type: attachment.content_type,
            length,
        })
    }

    /// Flushes pending writes.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotImplemented`] if the driver has no flush support.
    pub async fn flush(&self) -> DriverResult<()> {
        match self.inner.as_flusher() {
            Some(flusher) => flusher.flush().await,
            None => Err(self.missing_capability(Capability::Flush)),
        }
    }

    /// Copies a document to another id, attachments included.
    ///
    /// `options.target_rev` must name the target's current revision when the
    /// target already exists.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotFound`] if the source is missing,
    /// [`DriverError::Conflict`] if the target revision is stale.
    pub async fn copy(&self, target_id: &str, source_id: &str, options: CopyOptions) -> DriverResult<RevId> {
        if let Some(copier) = self.inner.as_copier() {
            return copier.copy(target_id, source_id, options).await;
        }

        debug!(db = %self.name, source_id, target_id, "emulating copy through get and put");
        let source = self
            .get(
                source_id,
                GetOptions {
                    rev: options.source_rev,
                    attachments: true,
                    ..Default::default()
                },
            )
            .await?;

        let mut body = match source {
            Value::Object(body) => body,
            other => return Err(DriverError::BadRequest(format!("Document body must be an object, got {other}"))),
        };
        strip_copy_excluded(&mut body);
        set_body_rev(&mut body, options.target_rev.as_ref());

        self.put(target_id, Value::Object(body)).await
    }
}

fn strip_copy_excluded(body: &mut Map<String, Value>) {
    for member in COPY_EXCLUDED {
        body.remove(member);
    }
}
