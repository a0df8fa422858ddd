//! chbridge core - shared abstractions for the data movement engine
//!
//! This crate provides the fundamental traits and types that all other
//! chbridge crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` - Trait for live database connections
//! - `RowCursor` - Pull-based cursor over a projected result set
//! - `SchemaIntrospection` - Trait for table listing and description
//! - Endpoint value objects, the schema model and `ColumnProjection`
//! - Common types like `Value` and `Row`

mod connection;
mod driver;
mod endpoint;
mod error;
mod plan;
mod schema;
#[cfg(feature = "test-support")]
pub mod testing;
mod types;

pub use connection::*;
pub use driver::*;
pub use endpoint::*;
pub use error::*;
pub use plan::*;
pub use schema::*;
pub use types::*;
