//! The in-memory driver and its client.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use mea::rwlock::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info};

use couchlayer_core::{
    driver::{Client, Config, Db, Driver, DriverBuilder},
    error::{DriverError, DriverResult},
    types::Version,
};

use crate::{
    config::{MemoryConfig, Settings, Validator},
    database::{DatabaseState, MemoryDb},
};

type DatabaseMap = BTreeMap<String, Arc<DatabaseState>>;
type ConfigSections = BTreeMap<String, BTreeMap<String, String>>;

/// Driver keeping every database in process memory.
///
/// Each client created by the driver owns an independent set of databases;
/// clones of a client share them.
///
/// # Example
///
/// ```ignore
/// use couchlayer_memory::MemoryDriver;
/// use couchlayer_core::driver::{Driver, DriverBuilder};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let driver = MemoryDriver::builder().with_revs_limit(10).build().await?;
///     let client = driver.new_client("").await?;
///
///     client.create_db("animals").await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    settings: Arc<Settings>,
}

impl MemoryDriver {
    /// Creates a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing a `MemoryDriver` with custom options.
    pub fn builder() -> MemoryDriverBuilder {
        MemoryDriverBuilder::default()
    }

    /// The configuration shared by every database of this driver.
    pub fn config(&self) -> &MemoryConfig {
        &self.settings.config
    }

    /// Creates a client with an empty set of databases.
    pub fn client(&self) -> MemoryClient {
        MemoryClient::new(self.settings.clone())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn new_client(&self, dsn: &str) -> DriverResult<Box<dyn Client>> {
        debug!(dsn, "creating memory client");
        Ok(Box::new(self.client()))
    }
}

/// Builder for constructing [`MemoryDriver`] instances.
///
/// # Example
///
/// ```ignore
/// use couchlayer_memory::MemoryDriver;
/// use couchlayer_core::driver::DriverBuilder;
///
/// let driver = MemoryDriver::builder()
///     .with_validator(|doc| match doc.get("type") {
///         Some(_) => Ok(()),
///         None => Err("documents need a type".to_string()),
///     })
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct MemoryDriverBuilder {
    config: MemoryConfig,
    validators: Vec<Validator>,
}

impl MemoryDriverBuilder {
    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how many revisions per branch compaction keeps.
    pub fn with_revs_limit(mut self, revs_limit: usize) -> Self {
        self.config.revs_limit = revs_limit;
        self
    }

    /// Adds a validation hook run on every write.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl fmt::Debug for MemoryDriverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriverBuilder")
            .field("config", &self.config)
            .field("validators", &self.validators.len())
            .finish()
    }
}

#[async_trait]
impl DriverBuilder for MemoryDriverBuilder {
    type Driver = MemoryDriver;

    /// Builds the driver.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if `revs_limit` is zero.
    async fn build(self) -> DriverResult<Self::Driver> {
        if self.config.revs_limit == 0 {
            return Err(DriverError::BadRequest("revs_limit must be at least 1".to_string()));
        }

        Ok(MemoryDriver {
            settings: Arc::new(Settings {
                config: self.config,
                validators: self.validators,
            }),
        })
    }
}

/// Checks a database name against `^[a-z][a-z0-9_$()+/-]*$`.
fn validate_db_name(name: &str) -> DriverResult<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+/-".contains(c));

    if valid {
        Ok(())
    } else {
        Err(DriverError::BadRequest(format!("Illegal database name: {name}")))
    }
}

/// Server configuration held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryServerConfig {
    sections: Arc<RwLock<ConfigSections>>,
}

#[async_trait]
impl Config for MemoryServerConfig {
    async fn get_all(&self) -> DriverResult<ConfigSections> {
        Ok(self.sections.read().await.clone())
    }

    async fn set(&self, section: &str, key: &str, value: &str) -> DriverResult<()> {
        self.sections
            .write()
            .await
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, section: &str, key: &str) -> DriverResult<()> {
        let mut sections = self.sections.write().await;
        let removed = sections
            .get_mut(section)
            .and_then(|entries| entries.remove(key))
            .is_some();

        if sections.get(section).is_some_and(BTreeMap::is_empty) {
            sections.remove(section);
        }

        if !removed {
            return Err(DriverError::NotFound(format!("config {section}/{key}")));
        }

        Ok(())
    }

    async fn get_section(&self, section: &str) -> DriverResult<BTreeMap<String, String>> {
        Ok(self.sections.read().await.get(section).cloned().unwrap_or_default())
    }
}

/// A client of the in-memory driver.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    databases: Arc<RwLock<DatabaseMap>>,
    server_config: MemoryServerConfig,
    settings: Arc<Settings>,
}

impl MemoryClient {
    pub(crate) fn new(settings: Arc<Settings>) -> Self {
        Self {
            databases: Arc::new(RwLock::new(DatabaseMap::new())),
            server_config: MemoryServerConfig::default(),
            settings,
        }
    }

    /// Returns a concrete handle to an existing database.
    pub async fn memory_db(&self, name: &str) -> DriverResult<MemoryDb> {
        self.databases
            .read()
            .await
            .get(name)
            .cloned()
            .map(MemoryDb::new)
            .ok_or_else(|| DriverError::NotFound(format!("database {name}")))
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn version(&self) -> DriverResult<Version> {
        let version = env!("CARGO_PKG_VERSION");

        Ok(Version {
            version: version.to_string(),
            vendor: "couchlayer".to_string(),
            raw: json!({
                "couchdb": "Welcome",
                "version": version,
                "vendor": { "name": "couchlayer-memory" },
            }),
        })
    }

    async fn all_dbs(&self) -> DriverResult<Vec<String>> {
        Ok(self.databases.read().await.keys().cloned().collect())
    }

    async fn db_exists(&self, name: &str) -> DriverResult<bool> {
        Ok(self.databases.read().await.contains_key(name))
    }

    async fn create_db(&self, name: &str) -> DriverResult<()> {
        validate_db_name(name)?;

        let mut databases = self.databases.write().await;
        if databases.contains_key(name) {
            return Err(DriverError::PreconditionFailed(format!("database {name} already exists")));
        }
        databases.insert(name.to_string(), Arc::new(DatabaseState::new(name, self.settings.clone())));

        info!(db = name, "created database");
        Ok(())
    }

    async fn destroy_db(&self, name: &str) -> DriverResult<()> {
        let state = self
            .databases
            .write()
            .await
            .remove(name)
            .ok_or_else(|| DriverError::NotFound(format!("database {name}")))?;

        state.mark_destroyed();

        info!(db = name, "destroyed database");
        Ok(())
    }

    async fn db(&self, name: &str) -> DriverResult<Arc<dyn Db>> {
        Ok(Arc::new(self.memory_db(name).await?))
    }

    fn config(&self) -> Option<&dyn Config> {
        Some(&self.server_config)
    }
}
