//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the connection manager
///
/// Controls timeouts and idle eviction. All durations are stored in
/// milliseconds so the struct maps directly onto the `[pool]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Timeout in milliseconds before an idle connection is closed
    idle_timeout_ms: u64,
    /// Timeout in milliseconds when waiting for an endpoint's connection
    acquire_timeout_ms: u64,
    /// Timeout in milliseconds for opening and validating a new connection
    connect_timeout_ms: u64,
    /// Period in milliseconds of the background eviction timer
    eviction_interval_ms: u64,
    /// Ping idle connections before handing them out again
    validate_on_checkout: bool,
}

impl PoolConfig {
    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the connect timeout in milliseconds
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set the eviction timer period in milliseconds
    pub fn with_eviction_interval_ms(mut self, interval_ms: u64) -> Self {
        self.eviction_interval_ms = interval_ms;
        self
    }

    pub fn with_validate_on_checkout(mut self, validate: bool) -> Self {
        self.validate_on_checkout = validate;
        self
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the eviction period as a Duration, never shorter than 10ms
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms.max(10))
    }

    pub fn validate_on_checkout(&self) -> bool {
        self.validate_on_checkout
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - idle_timeout: 5 minutes
    /// - acquire_timeout: 30 seconds
    /// - connect_timeout: 10 seconds
    /// - eviction_interval: 30 seconds
    /// - validate_on_checkout: true
    fn default() -> Self {
        Self {
            idle_timeout_ms: 300_000,
            acquire_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            eviction_interval_ms: 30_000,
            validate_on_checkout: true,
        }
    }
}
