//! Plain data types exchanged across the driver boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::DriverResult, revision::RevId};

/// Server or backend version information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Version number reported by the backend.
    pub version: String,
    /// Vendor string reported by the backend.
    pub vendor: String,
    /// Raw response as returned by the backend, if any.
    #[serde(default)]
    pub raw: Value,
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    #[serde(rename = "db_name")]
    pub name: String,
    pub compact_running: bool,
    pub doc_count: u64,
    #[serde(rename = "doc_del_count")]
    pub deleted_count: u64,
    pub update_seq: u64,
    pub disk_size: u64,
    #[serde(rename = "data_size")]
    pub active_size: u64,
}

/// Members of a database security document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Members {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// A database security document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    #[serde(default)]
    pub admins: Members,
    #[serde(default)]
    pub members: Members,
}

/// A single entry of a database's change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Update sequence assigned when the change was committed.
    pub seq: u64,
    /// Document the change applies to.
    pub id: String,
    /// Revision created by the change.
    pub rev: RevId,
    /// Whether the change was a deletion.
    #[serde(default)]
    pub deleted: bool,
    /// Current winning body of the document, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Outcome of one document in a bulk update.
///
/// Results are reported in the same order as the submitted documents.
#[derive(Debug)]
pub struct BulkResult {
    /// The document id (generated if the submitted document had none).
    pub id: String,
    /// The new revision, or the error that rejected this document.
    pub result: DriverResult<RevId>,
}

impl BulkResult {
    /// Returns the new revision if this document was committed.
    pub fn rev(&self) -> Option<&RevId> {
        self.result.as_ref().ok()
    }
}

/// A Mango-style index definition as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "ddoc", default, skip_serializing_if = "Option::is_none")]
    pub design_doc: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: String,
    #[serde(rename = "def")]
    pub definition: Value,
}
