//! Core of couchlayer: a pluggable, CouchDB-style document database driver abstraction.
//!
//! This crate defines the contract every backend implements and the types that
//! cross it:
//!
//! - **Driver traits** ([`driver`]) - `Driver`/`Client`/`Db` plus optional capabilities
//! - **Revisions** ([`revision`]) - `"<generation>-<hash>"` revision identifiers
//! - **Attachments** ([`attachment`]) - buffered, checksummed binary payloads
//! - **Find queries** ([`find`]) - selector parsing and the query visitor
//! - **Change feeds** ([`changes`]) - continuous and finite feeds with cancellation
//! - **Options and results** ([`options`], [`rows`], [`types`])
//! - **Typed documents** ([`document`])
//! - **Error handling** ([`error`]) - the error taxonomy shared by all backends
//!
//! # Example
//!
//! ```ignore
//! use couchlayer_core::{driver::Db, options::GetOptions};
//! use serde_json::json;
//!
//! let rev = db.put("a", json!({ "x": 1 })).await?;
//! let rev = db.put("a", json!({ "_rev": rev.to_string(), "x": 2 })).await?;
//! let doc = db.get("a", GetOptions::default()).await?;
//! assert_eq!(doc["x"], 2);
//! ```

#[allow(unused_extern_crates)]
extern crate self as couchlayer_core;

pub mod attachment;
pub mod changes;
pub mod document;
pub mod driver;
pub mod error;
pub mod find;
pub mod options;
pub mod revision;
pub mod rows;
pub mod types;
