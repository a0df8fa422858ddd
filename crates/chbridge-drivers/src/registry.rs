//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;

use chbridge_core::DatabaseDriver;

/// Registry of available database drivers, keyed by driver id
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "clickhouse")]
        registry.register(Arc::new(crate::clickhouse::ClickHouseDriver::new()));

        registry
    }

    /// Register a new driver, replacing any driver with the same id
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let id = driver.id().to_string();
        tracing::info!(driver = %id, "registering database driver");
        self.drivers.insert(id, driver);
    }

    /// Get a driver by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(id).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %id, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver ids, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a driver is registered
    pub fn has(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chbridge_core::testing::{MemoryDriver, MemoryStore};

    #[test]
    fn test_register_and_get() {
        let mut registry = DriverRegistry::new();
        assert!(!registry.has("memory"));
        registry.register(Arc::new(MemoryDriver::new(MemoryStore::new())));
        assert!(registry.has("memory"));
        assert_eq!(registry.get("memory").map(|d| d.display_name()), Some("In-memory"));
        assert!(registry.get("postgres").is_none());
    }

    #[cfg(feature = "clickhouse")]
    #[test]
    fn test_defaults_include_clickhouse() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.list(), vec!["clickhouse"]);
        assert_eq!(registry.get("clickhouse").and_then(|d| d.default_port()), Some(8123));
    }
}
