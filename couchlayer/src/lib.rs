//! Main couchlayer crate providing a unified interface to CouchDB-style document databases.
//!
//! This crate is the primary entry point for users of couchlayer. It re-exports
//! the core types, registers the built-in drivers and wraps driver handles in a
//! [`Client`](client::Client) and [`Database`](database::Database) that emulate
//! optional capabilities a driver does not provide.
//!
//! # Features
//!
//! - **Pluggable drivers** - select a backend by name at runtime through a [`Registry`](registry::Registry)
//! - **Revisions and conflicts** - optimistic concurrency with CouchDB revision semantics
//! - **Change feeds** - replayable and continuous feeds over every commit
//! - **Find queries** - selector queries with sorting, paging and projection
//! - **Typed documents** - store your own Serde types alongside raw JSON
//!
//! # Quick Start
//!
//! ```ignore
//! use couchlayer::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Animal {
//!     #[serde(rename = "_id")]
//!     pub id: String,
//!     pub sound: String,
//! }
//!
//! impl Document for Animal {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DriverResult<()> {
//!     let client = Client::new(&Registry::with_defaults(), "memory", "").await?;
//!     client.create_db("animals").await?;
//!
//!     let db = client.db("animals").await?;
//!     db.put_doc(&Animal { id: "cow".into(), sound: "moo".into() }).await?;
//!
//!     let cow: Animal = db.get_doc("cow").await?;
//!     println!("{cow:?}");
//!
//!     let rows = db
//!         .find(FindQuery::builder().selector(serde_json::json!({ "sound": "moo" })).build())
//!         .await?;
//!     println!("{} matches", rows.total_rows);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Change Feeds
//!
//! ```ignore
//! use couchlayer::prelude::*;
//! use futures::StreamExt;
//!
//! let feed = db.changes(ChangesOptions::continuous(0)).await?;
//! let close = feed.close_handle();
//!
//! let mut changes = into_stream(feed);
//! while let Some(change) = changes.next().await {
//!     let change = change?;
//!     println!("{} {} {}", change.seq, change.id, change.rev);
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development, testing and embedding

pub mod client;
pub mod database;
pub mod prelude;
pub mod registry;

pub use couchlayer_core::{attachment, changes, document, driver, error, find, options, revision, rows, types};

/// In-memory driver.
pub mod memory {
    pub use couchlayer_memory::{
        DEFAULT_REVS_LIMIT, MemoryChanges, MemoryClient, MemoryConfig, MemoryDb, MemoryDriver, MemoryDriverBuilder,
        MemoryServerConfig, Validator,
    };
}
