//! chbridge services layer
//!
//! This crate provides the operation interface that callers (the CLI, or any
//! transport wrapped around the engine) use to move data.
//!
//! # Architecture
//!
//! ```text
//! Caller (chbridge-cli)
//!     ↓
//! Service Layer (chbridge-services) ← This crate
//!     ↓
//! Engine (chbridge-interchange, chbridge-connection)
//!     ↓
//! Infrastructure Layer (chbridge-core, chbridge-drivers)
//! ```
//!
//! # Design Principles
//!
//! 1. **Endpoints in, view models out** - callers pass endpoint parameters and
//!    get serializable DTOs back, never live connections
//! 2. **One lease per call** - a connection is checked out for exactly one
//!    operation and returned (or discarded if it broke) afterwards
//! 3. **Configuration in one place** - [`BridgeConfig`] feeds the pool and
//!    every engine component

mod config;
mod error;
mod transfer_service;
mod view_models;

pub use config::{BridgeConfig, ConfigError, ConnectionDefaults, LoggingConfig, TransferConfig};
pub use error::{ServiceError, ServiceResult};
pub use transfer_service::{TransferService, import_report};
pub use view_models::{
    ColumnInfo, ConnectionInfo, ExportReport, ImportReport, JoinReport, PreviewData,
    ProgressView, RejectedRow, TableDetails, TableSummary,
};
