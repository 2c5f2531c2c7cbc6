//! Client handle.

use std::{fmt, sync::Arc};

use tracing::debug;

use couchlayer_core::{
    driver::{self, Config},
    error::{DriverError, DriverResult},
    types::Version,
};

use crate::{database::Database, registry::Registry};

/// A connection to a document server through a named driver.
///
/// Clones share the underlying driver client.
///
/// # Example
///
/// ```ignore
/// use couchlayer::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> DriverResult<()> {
///     let client = Client::new(&Registry::with_defaults(), "memory", "").await?;
///     client.create_db("animals").await?;
///
///     let db = client.db("animals").await?;
///     db.put("cow", serde_json::json!({ "sound": "moo" })).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    driver_name: String,
    dsn: String,
    inner: Arc<dyn driver::Client>,
}

impl Client {
    /// Connects to `dsn` using the driver registered as `driver_name`.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if the driver is not registered; otherwise
    /// whatever the driver reports while connecting.
    pub async fn new(registry: &Registry, driver_name: &str, dsn: &str) -> DriverResult<Self> {
        let driver = registry.driver(driver_name)?;
        let inner = driver.new_client(dsn).await?;

        debug!(driver = driver_name, dsn, "created client");

        Ok(Self {
            driver_name: driver_name.to_string(),
            dsn: dsn.to_string(),
            inner: Arc::from(inner),
        })
    }

    /// Wraps an existing driver client.
    pub fn from_driver_client(driver_name: &str, dsn: &str, inner: Box<dyn driver::Client>) -> Self {
        Self {
            driver_name: driver_name.to_string(),
            dsn: dsn.to_string(),
            inner: Arc::from(inner),
        }
    }

    /// Name of the driver this client was created with.
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// The data source name this client was created with.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// The underlying driver client.
    pub fn driver_client(&self) -> &dyn driver::Client {
        self.inner.as_ref()
    }

    /// Server version information.
    pub async fn version(&self) -> DriverResult<Version> {
        self.inner.version().await
    }

    /// Names of all databases, sorted.
    pub async fn all_dbs(&self) -> DriverResult<Vec<String>> {
        self.inner.all_dbs().await
    }

    pub async fn db_exists(&self, name: &str) -> DriverResult<bool> {
        self.inner.db_exists(name).await
    }

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// [`DriverError::PreconditionFailed`] if it already exists,
    /// [`DriverError::BadRequest`] for an invalid name.
    pub async fn create_db(&self, name: &str) -> DriverResult<()> {
        self.inner.create_db(name).await
    }

    /// Destroys a database. Open change feeds on it fail with `NotFound`.
    pub async fn destroy_db(&self, name: &str) -> DriverResult<()> {
        self.inner.destroy_db(name).await
    }

    /// Opens a handle to an existing database.
    ///
    /// The handle records which optional capabilities the driver supports and
    /// emulates the ones it can.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotFound`] if the database does not exist.
    pub async fn db(&self, name: &str) -> DriverResult<Database> {
        Ok(Database::new(name, self.inner.db(name).await?))
    }

    /// Server configuration.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotImplemented`] if the driver has no configuration support.
    pub fn config(&self) -> DriverResult<&dyn Config> {
        self.inner
            .config()
            .ok_or_else(|| DriverError::NotImplemented(format!("{} driver has no server config", self.driver_name)))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("driver_name", &self.driver_name)
            .field("dsn", &self.dsn)
            .finish()
    }
}
