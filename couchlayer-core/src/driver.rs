//! Driver abstraction.
//!
//! This module defines the capability surface every storage backend implements,
//! whether it talks to a remote server, proxies another client, or keeps
//! everything in memory.
//!
//! # Overview
//!
//! - [`Driver`] creates [`Client`] connections from a data source name.
//! - [`Client`] manages databases and hands out [`Db`] handles.
//! - [`Db`] is the required per-database surface: documents, changes, bulk
//!   updates, attachments, statistics and maintenance.
//! - Optional capabilities ([`Finder`], [`AttachmentMetaer`], [`Rever`],
//!   [`DbFlusher`], [`Copier`]) are exposed through `as_*` accessors on [`Db`];
//!   [`Config`] through [`Client::config`]. A backend advertises what it
//!   supports through [`Capabilities`], and callers emulate what is missing.
//!
//! # Example
//!
//! ```ignore
//! use couchlayer_core::driver::{Capability, Db};
//!
//! let db = client.db("animals").await?;
//! if db.capabilities().contains(Capability::Find) {
//!     let rows = db.as_finder().unwrap().find(query).await?;
//! }
//! ```

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    attachment::{Attachment, AttachmentMeta},
    changes::Changes,
    error::{DriverError, DriverResult},
    find::{FindQuery, IndexDefinition},
    options::{AllDocsOptions, BulkOptions, ChangesOptions, CopyOptions, GetOptions},
    revision::RevId,
    rows::ResultSet,
    types::{BulkResult, DbStats, Index, Security, Version},
};

/// Creates client connections for one kind of backend.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Returns a connection handle. The format of `dsn` is driver-specific.
    async fn new_client(&self, dsn: &str) -> DriverResult<Box<dyn Client>>;
}

/// Factory trait for constructing drivers with configuration.
#[async_trait]
pub trait DriverBuilder {
    type Driver: Driver;

    /// Builds the driver.
    async fn build(self) -> DriverResult<Self::Driver>;
}

/// A connection to a database server or backend.
#[async_trait]
pub trait Client: Send + Sync + Debug {
    /// Returns the backend's version details.
    async fn version(&self) -> DriverResult<Version>;

    /// Returns the names of all databases, sorted.
    async fn all_dbs(&self) -> DriverResult<Vec<String>>;

    /// Returns `true` if the database exists.
    async fn db_exists(&self, name: &str) -> DriverResult<bool>;

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// [`DriverError::PreconditionFailed`] if it already exists,
    /// [`DriverError::BadRequest`] if the name is not a valid database name.
    async fn create_db(&self, name: &str) -> DriverResult<()>;

    /// Destroys a database and everything in it.
    async fn destroy_db(&self, name: &str) -> DriverResult<()>;

    /// Returns a handle to an existing database.
    async fn db(&self, name: &str) -> DriverResult<Arc<dyn Db>>;

    /// Server configuration access, if supported.
    fn config(&self) -> Option<&dyn Config> {
        None
    }
}

/// A database handle.
///
/// Document bodies are JSON objects passed through unmodified, apart from the
/// `_id`, `_rev`, `_deleted`, `_attachments`, `_revisions` and `_conflicts` members
/// the backend reads and injects.
#[async_trait]
pub trait Db: Send + Sync + Debug {
    /// Lists documents in id order.
    async fn all_docs(&self, options: AllDocsOptions) -> DriverResult<ResultSet>;

    /// Fetches a document, by default at its winning revision.
    async fn get(&self, doc_id: &str, options: GetOptions) -> DriverResult<Value>;

    /// Creates a document with a backend-generated id.
    async fn create_doc(&self, doc: Value) -> DriverResult<(String, RevId)>;

    /// Writes a document. The parent revision is taken from the body's `_rev`.
    ///
    /// # Errors
    ///
    /// [`DriverError::Conflict`] if `_rev` does not name the current winning
    /// revision (or is missing for an existing document).
    async fn put(&self, doc_id: &str, doc: Value) -> DriverResult<RevId>;

    /// Marks a document as deleted, returning the tombstone revision.
    async fn delete(&self, doc_id: &str, rev: &RevId) -> DriverResult<RevId>;

    /// Returns database statistics.
    async fn stats(&self) -> DriverResult<DbStats>;

    /// Compacts the database, pruning non-winning history.
    async fn compact(&self) -> DriverResult<()>;

    /// Compacts the indexes of a design document.
    async fn compact_view(&self, ddoc: &str) -> DriverResult<()>;

    /// Removes index data no longer referenced by any design document.
    async fn view_cleanup(&self) -> DriverResult<()>;

    /// Returns the security document.
    async fn security(&self) -> DriverResult<Security>;

    /// Replaces the security document.
    async fn set_security(&self, security: Security) -> DriverResult<()>;

    /// Opens a change feed.
    async fn changes(&self, options: ChangesOptions) -> DriverResult<Box<dyn Changes>>;

    /// Applies a batch of writes. Each document is committed or rejected on its
    /// own; the batch as a whole is not atomic.
    async fn bulk_docs(&self, docs: Vec<Value>, options: BulkOptions) -> DriverResult<Vec<BulkResult>>;

    /// Stores an attachment, creating a new document revision.
    ///
    /// `rev` must name the current winning revision; `None` is only valid when the
    /// document does not exist yet.
    async fn put_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        attachment: Attachment,
    ) -> DriverResult<RevId>;

    /// Fetches an attachment. `rev: None` resolves to the winning revision.
    async fn get_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<Attachment>;

    /// Removes an attachment, creating a new document revision.
    async fn delete_attachment(&self, doc_id: &str, rev: &RevId, filename: &str) -> DriverResult<RevId>;

    /// Queries a view of a design document.
    async fn query(&self, ddoc: &str, view: &str, options: Value) -> DriverResult<ResultSet>;

    fn as_finder(&self) -> Option<&dyn Finder> {
        None
    }

    fn as_attachment_metaer(&self) -> Option<&dyn AttachmentMetaer> {
        None
    }

    fn as_rever(&self) -> Option<&dyn Rever> {
        None
    }

    fn as_flusher(&self) -> Option<&dyn DbFlusher> {
        None
    }

    fn as_copier(&self) -> Option<&dyn Copier> {
        None
    }

    /// The optional capabilities this handle supports.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
            .with_if(Capability::Find, self.as_finder().is_some())
            .with_if(Capability::AttachmentMeta, self.as_attachment_metaer().is_some())
            .with_if(Capability::Rev, self.as_rever().is_some())
            .with_if(Capability::Flush, self.as_flusher().is_some())
            .with_if(Capability::Copy, self.as_copier().is_some())
    }
}

/// Mango-style queries and index management.
#[async_trait]
pub trait Finder: Send + Sync {
    /// Runs a selector query.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if the selector is missing or malformed.
    async fn find(&self, query: FindQuery) -> DriverResult<ResultSet>;

    /// Creates an index if it does not exist yet.
    async fn create_index(
        &self,
        ddoc: Option<&str>,
        name: Option<&str>,
        index: IndexDefinition,
    ) -> DriverResult<()>;

    /// Lists all indexes.
    async fn get_indexes(&self) -> DriverResult<Vec<Index>>;

    /// Deletes an index.
    async fn delete_index(&self, ddoc: &str, name: &str) -> DriverResult<()>;
}

/// Attachment metadata without transferring the content.
#[async_trait]
pub trait AttachmentMetaer: Send + Sync {
    async fn get_attachment_meta(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        filename: &str,
    ) -> DriverResult<AttachmentMeta>;
}

/// Cheap lookup of a document's winning revision.
#[async_trait]
pub trait Rever: Send + Sync {
    async fn rev(&self, doc_id: &str) -> DriverResult<RevId>;
}

/// Flushes pending writes to permanent storage.
#[async_trait]
pub trait DbFlusher: Send + Sync {
    async fn flush(&self) -> DriverResult<()>;
}

/// Server-side document copy.
#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy(&self, target_id: &str, source_id: &str, options: CopyOptions) -> DriverResult<RevId>;
}

/// Backend configuration, organized in sections of key/value pairs.
///
/// `get_section` and `get` default to filtering [`Config::get_all`]; backends
/// override them when reading a part is cheaper than reading everything.
#[async_trait]
pub trait Config: Send + Sync {
    async fn get_all(&self) -> DriverResult<BTreeMap<String, BTreeMap<String, String>>>;

    async fn set(&self, section: &str, key: &str, value: &str) -> DriverResult<()>;

    async fn delete(&self, section: &str, key: &str) -> DriverResult<()>;

    async fn get_section(&self, section: &str) -> DriverResult<BTreeMap<String, String>> {
        Ok(self.get_all().await?.remove(section).unwrap_or_default())
    }

    async fn get(&self, section: &str, key: &str) -> DriverResult<String> {
        self.get_section(section)
            .await?
            .remove(key)
            .ok_or_else(|| DriverError::NotFound(format!("config {section}/{key}")))
    }
}

/// An optional capability a database handle may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Find,
    AttachmentMeta,
    Rev,
    Flush,
    Copy,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 5] = [
        Capability::Find,
        Capability::AttachmentMeta,
        Capability::Rev,
        Capability::Flush,
        Capability::Copy,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of [`Capability`] flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// The empty set.
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    /// Returns the set with `capability` added.
    pub const fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    /// Returns the set with `capability` added when `enabled` is true.
    pub const fn with_if(self, capability: Capability, enabled: bool) -> Self {
        if enabled { self.with(capability) } else { self }
    }

    /// Whether `capability` is in the set.
    pub const fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Iterates over the capabilities in the set.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.contains(*capability))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Capabilities::empty(), Capabilities::with)
    }
}
