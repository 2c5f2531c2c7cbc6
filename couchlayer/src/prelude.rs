//! Convenient re-exports of commonly used types from couchlayer.
//!
//! ```ignore
//! use couchlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - The client, database handle and driver registry
//! - Driver traits and capability flags
//! - Typed documents, revisions and attachments
//! - Find queries, options and results
//! - Error types

pub use crate::{client::Client, database::Database, registry::Registry};

pub use couchlayer_core::{
    attachment::{Attachment, AttachmentMeta, Md5Sum},
    changes::{Changes, CloseHandle, into_stream},
    document::{Document, DocumentExt},
    driver::{Capabilities, Capability, Config, Db, Driver, DriverBuilder},
    error::{DriverError, DriverResult},
    find::{FindQuery, FindQueryBuilder, SortDirection},
    options::{AllDocsOptions, BulkOptions, ChangesOptions, CopyOptions, GetOptions},
    revision::RevId,
    rows::{ResultSet, Row},
    types::{BulkResult, Change, DbStats, Security},
};
