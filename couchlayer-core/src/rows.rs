//! Result rows and pagination for listing operations.
//!
//! `AllDocs`, `Find` and view queries all return a [`ResultSet`]: the rows in
//! their final order plus the `offset` actually applied and the `total_rows`
//! count before pagination. [`Window`] applies `skip` and `limit` to an
//! already-ordered sequence and produces the matching metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Document id the row was produced from.
    pub id: String,
    /// Row key (the document id for `AllDocs`).
    #[serde(default)]
    pub key: Value,
    /// Row value (`{"rev": ...}` for `AllDocs`).
    #[serde(default)]
    pub value: Value,
    /// Document body, when requested or when the operation always returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// An ordered sequence of rows with pagination metadata.
///
/// # Example
///
/// ```ignore
/// use couchlayer_core::rows::{ResultSet, Window};
///
/// let set = Window::new(3, Some(4)).apply((1..=10).collect::<Vec<_>>());
/// assert_eq!(set.rows, vec![4, 5, 6, 7]);
/// assert_eq!(set.offset, 3);
/// assert_eq!(set.total_rows, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet<T = Row> {
    /// Number of rows skipped before the first returned row.
    pub offset: usize,
    /// Number of rows before pagination was applied.
    pub total_rows: usize,
    /// The rows themselves.
    pub rows: Vec<T>,
    /// Advisory message from the backend (e.g. a query ran without an index).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl<T> ResultSet<T> {
    /// Creates a new builder for a result set over `rows`.
    pub fn builder(rows: Vec<T>) -> ResultSetBuilder<T> {
        ResultSetBuilder::new(rows)
    }

    /// Maps every row, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ResultSet<U> {
        ResultSet {
            offset: self.offset,
            total_rows: self.total_rows,
            rows: self.rows.into_iter().map(f).collect(),
            warning: self.warning,
        }
    }
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self {
            offset: 0,
            total_rows: 0,
            rows: Vec::new(),
            warning: None,
        }
    }
}

/// Builder for constructing [`ResultSet`] instances.
pub struct ResultSetBuilder<T> {
    rows: Vec<T>,
    offset: usize,
    total_rows: Option<usize>,
    warning: Option<String>,
}

impl<T> ResultSetBuilder<T> {
    /// Creates a new builder with the given rows.
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows,
            offset: 0,
            total_rows: None,
            warning: None,
        }
    }

    /// Sets the offset reported for the first row.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the pre-pagination row count. Defaults to the number of rows.
    pub fn with_total_rows(mut self, total_rows: usize) -> Self {
        self.total_rows = Some(total_rows);
        self
    }

    /// Sets an advisory warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Builds and returns the final [`ResultSet`].
    pub fn build(self) -> ResultSet<T> {
        ResultSet {
            total_rows: self.total_rows.unwrap_or(self.rows.len()),
            offset: self.offset,
            rows: self.rows,
            warning: self.warning,
        }
    }
}

/// `skip`/`limit` parameters applied to an ordered sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Number of leading items to drop.
    pub skip: usize,
    /// Maximum number of items to keep, unbounded if `None`.
    pub limit: Option<usize>,
}

impl Window {
    /// Creates a new window.
    pub fn new(skip: usize, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    /// Applies the window to `items`, which must already be in their final order.
    ///
    /// `offset` reports the skip actually applied and `total_rows` the length of
    /// `items` before pagination.
    pub fn apply<T>(&self, items: Vec<T>) -> ResultSet<T> {
        let total_rows = items.len();
        let rows = items
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect::<Vec<_>>();

        ResultSet::builder(rows)
            .with_offset(self.skip)
            .with_total_rows(total_rows)
            .build()
    }
}
