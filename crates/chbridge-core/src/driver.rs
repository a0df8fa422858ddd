//! Database driver trait definition

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Connection, DatabaseEndpoint, Result};

/// Database driver trait
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "clickhouse")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Display name for UI
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Default connection port
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Open a connection and verify the server accepts it.
    ///
    /// Failures are reported as `BridgeError::Connection` with the matching
    /// `ConnectionError` variant.
    async fn connect(&self, endpoint: &DatabaseEndpoint) -> Result<Arc<dyn Connection>>;
}
