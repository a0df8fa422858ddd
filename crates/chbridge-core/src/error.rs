//! Error types for chbridge

use std::time::Duration;

use thiserror::Error;

/// Why a database endpoint could not be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The endpoint could not be reached (DNS, refused, TLS, HTTP failure)
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The server answered but rejected the credentials
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Connecting or waiting for a pooled connection took too long
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Schema lookups and projection validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table '{0}' not found")]
    NotFound(String),

    #[error("unknown column '{column}' in '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("column '{column}' is ambiguous; qualify it with one of: {}", candidates.join(", "))]
    AmbiguousColumn {
        column: String,
        candidates: Vec<String>,
    },

    #[error("column projection is empty")]
    EmptyProjection,

    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),
}

/// Core error type for chbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("query error: {0}")]
    Query(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("cancelled")]
    Cancelled,
}

impl BridgeError {
    /// True when the error means the connection itself is no longer usable
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BridgeError::Connection(_))
    }
}

/// Result type alias for chbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
