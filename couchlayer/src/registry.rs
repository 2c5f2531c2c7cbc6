//! Named drivers.
//!
//! A [`Registry`] maps driver names to [`Driver`] implementations so the
//! backend behind a [`Client`](crate::client::Client) can be chosen at runtime,
//! typically from configuration.
//!
//! # Example
//!
//! ```ignore
//! use couchlayer::{client::Client, registry::Registry};
//!
//! let registry = Registry::with_defaults();
//! let client = Client::new(&registry, "memory", "").await?;
//! ```

use std::{collections::BTreeMap, sync::Arc};

use couchlayer_core::{
    driver::Driver,
    error::{DriverError, DriverResult},
};
use couchlayer_memory::MemoryDriver;

/// Name the in-memory driver is registered under by [`Registry::with_defaults`].
pub const MEMORY_DRIVER: &str = "memory";

/// A set of drivers addressable by name.
///
/// Registries are plain values: each one is independent, and registering a
/// driver under an existing name replaces it.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in drivers (`"memory"`).
    pub fn with_defaults() -> Self {
        Self::new().with_driver(MEMORY_DRIVER, MemoryDriver::new())
    }

    /// Registers a driver, returning the registry for chaining.
    pub fn with_driver(mut self, name: impl Into<String>, driver: impl Driver + 'static) -> Self {
        self.register(name, driver);
        self
    }

    /// Registers a driver, replacing any driver of the same name.
    pub fn register(&mut self, name: impl Into<String>, driver: impl Driver + 'static) {
        self.drivers.insert(name.into(), Arc::new(driver));
    }

    /// Looks up a driver by name.
    ///
    /// # Errors
    ///
    /// [`DriverError::BadRequest`] if no driver is registered under `name`.
    pub fn driver(&self, name: &str) -> DriverResult<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::BadRequest(format!("Unknown driver: {name}")))
    }

    /// Names of all registered drivers, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
