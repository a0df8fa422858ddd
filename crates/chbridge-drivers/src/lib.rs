//! chbridge drivers - database driver implementations
//!
//! This crate collects the concrete implementations of the driver traits
//! defined in `chbridge-core` and exposes them through a [`DriverRegistry`].

#[cfg(feature = "clickhouse")]
pub use chbridge_driver_clickhouse as clickhouse;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from chbridge-core
pub use chbridge_core::{
    BridgeError, Connection, DatabaseDriver, DatabaseEndpoint, Result, RowCursor,
    SchemaIntrospection,
};
