//! ClickHouse driver for chbridge
//!
//! Talks to the server's HTTP interface through the `clickhouse` client.
//! Result sets are read as `JSONEachRow` and decoded incrementally; inserts
//! send one batch per request as `INSERT ... FORMAT JSONEachRow`.

mod cursor;
mod driver;
#[cfg(test)]
mod driver_tests;
mod schema;
pub mod sql;
pub mod types;

pub use cursor::JsonEachRowCursor;
pub use driver::*;
