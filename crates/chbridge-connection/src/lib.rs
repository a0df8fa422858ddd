//! chbridge connection - endpoint-keyed connection pooling
//!
//! The [`ConnectionManager`] owns every live database connection. It keeps at
//! most one connection per distinct [`chbridge_core::DatabaseEndpoint`], hands
//! it out exclusively through a [`ConnectionLease`] and closes it once it has
//! been idle longer than the configured timeout.

mod config;
mod lease;
mod manager;
mod stats;

pub use config::PoolConfig;
pub use lease::ConnectionLease;
pub use manager::ConnectionManager;
pub use stats::PoolStats;
