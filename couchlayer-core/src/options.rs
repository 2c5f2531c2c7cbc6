//! Typed options for driver operations.
//!
//! Every options struct deserializes from a JSON object with all fields optional, so
//! front ends can build them straight from request parameters.

use serde::{Deserialize, Serialize};

use crate::revision::RevId;

/// Options for fetching a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetOptions {
    /// Specific revision to fetch; the winning revision if `None`.
    pub rev: Option<RevId>,
    /// Include the revision history as `_revisions`.
    pub revs: bool,
    /// Include conflicting leaf revisions as `_conflicts`.
    pub conflicts: bool,
    /// Inline attachment content instead of stubs.
    pub attachments: bool,
}

impl GetOptions {
    /// Options that fetch the given revision.
    pub fn rev(rev: RevId) -> Self {
        Self { rev: Some(rev), ..Self::default() }
    }
}

/// Options for listing all documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllDocsOptions {
    /// First document id to return (in iteration order).
    #[serde(alias = "startkey")]
    pub start_key: Option<String>,
    /// Last document id to return (in iteration order).
    #[serde(alias = "endkey")]
    pub end_key: Option<String>,
    /// Whether `end_key` itself is part of the range.
    pub inclusive_end: bool,
    /// Iterate in descending id order.
    pub descending: bool,
    /// Include the winning body of each document.
    pub include_docs: bool,
    /// Number of rows to skip after ordering.
    pub skip: usize,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
}

impl Default for AllDocsOptions {
    fn default() -> Self {
        Self {
            start_key: None,
            end_key: None,
            inclusive_end: true,
            descending: false,
            include_docs: false,
            skip: 0,
            limit: None,
        }
    }
}

/// Options for reading the change log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangesOptions {
    /// Only changes with a sequence greater than this are reported.
    pub since: u64,
    /// Keep the feed open and wait for new changes until it is closed.
    pub continuous: bool,
    /// Include the current winning body of each changed document.
    pub include_docs: bool,
    /// Stop after this many changes.
    pub limit: Option<usize>,
}

impl ChangesOptions {
    /// Options for a continuous feed starting after `since`.
    pub fn continuous(since: u64) -> Self {
        Self { since, continuous: true, ..Self::default() }
    }
}

/// Options for bulk updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// When `false`, documents carry their own revisions (replication mode) and are
    /// grafted into the revision tree as given instead of being conflict-checked.
    pub new_edits: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self { new_edits: true }
    }
}

/// Options for copying a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Revision of the source document to copy; the winning revision if `None`.
    pub source_rev: Option<RevId>,
    /// Current revision of the target document, required when it already exists.
    pub target_rev: Option<RevId>,
}
