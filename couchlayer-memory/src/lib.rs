//! In-memory driver for couchlayer.
//!
//! This crate implements the couchlayer driver traits entirely in process
//! memory. It is meant for tests, embedded use and development, and follows
//! CouchDB semantics closely.
//!
//! # Features
//!
//! - **Revision trees** - full per-document history with deterministic
//!   winner selection and conflict tracking
//! - **Change feeds** - dense update sequences with continuous, cancellable feeds
//! - **Bulk updates** - per-document atomicity, including replication mode
//! - **Attachments** - MD5-checksummed binary payloads shared across revisions
//! - **Find queries** - selector evaluation with sorting, pagination and projection
//!
//! # Quick Start
//!
//! ```ignore
//! use couchlayer_memory::MemoryDriver;
//! use couchlayer_core::{driver::{Client, Db, DriverBuilder}, options::GetOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MemoryDriver::builder().build().await?.client();
//!     client.create_db("animals").await?;
//!
//!     let db = client.db("animals").await?;
//!     let rev = db.put("cow", json!({ "sound": "moo" })).await?;
//!     let doc = db.get("cow", GetOptions::default()).await?;
//!     assert_eq!(doc["_rev"], rev.to_string());
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as couchlayer_memory;

mod attachments;
mod body;
mod bulk;
mod changes;
mod config;
mod database;
mod driver;
mod evaluator;
mod find;
mod tree;

pub use changes::MemoryChanges;
pub use config::{DEFAULT_REVS_LIMIT, MemoryConfig, Validator};
pub use database::MemoryDb;
pub use driver::{MemoryClient, MemoryDriver, MemoryDriverBuilder, MemoryServerConfig};
