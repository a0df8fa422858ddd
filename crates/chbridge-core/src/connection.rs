//! Connection and cursor traits

use async_trait::async_trait;

use crate::{ColumnDef, JoinPlan, Result, Row, SchemaIntrospection, TableSchema};

/// A projected, optionally limited `SELECT` over one table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub table: String,
    /// Resolved columns in output order
    pub columns: Vec<ColumnDef>,
    /// Row limit applied by the server
    pub limit: Option<u64>,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            columns,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Pull-based cursor over a server result set.
///
/// Implementations buffer at most one network chunk of rows; `next_row` is the
/// only call that waits on I/O.
#[async_trait]
pub trait RowCursor: Send {
    /// Columns of every row this cursor yields
    fn columns(&self) -> &[ColumnDef];

    /// Next row, or `None` once the result set is exhausted
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// A live database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "clickhouse")
    fn driver_name(&self) -> &str;

    /// Database this connection operates on
    fn database(&self) -> &str;

    /// Open a streaming cursor for a projected select
    async fn select_stream(&self, request: &SelectRequest) -> Result<Box<dyn RowCursor>>;

    /// Bulk insert one batch of rows; returns the number of rows written
    async fn insert_rows(&self, table: &str, columns: &[ColumnDef], rows: &[Row]) -> Result<u64>;

    /// Create a table with the given columns
    async fn create_table(&self, schema: &TableSchema) -> Result<()>;

    /// Remove every row of a table, keeping its definition
    async fn truncate_table(&self, table: &str) -> Result<()>;

    /// Exact row count of a table
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Run a resolved join plan server-side, appending into the plan's target.
    ///
    /// `statement_id` names the running statement so that
    /// [`cancel_statement`](Self::cancel_statement) can stop it.
    async fn insert_join(&self, plan: &JoinPlan, statement_id: &str) -> Result<()>;

    /// Stop a statement started with the given id and wait until the server
    /// has stopped writing. Unknown ids are not an error.
    async fn cancel_statement(&self, statement_id: &str) -> Result<()>;

    /// Cheap round trip used to validate a pooled connection before reuse
    async fn ping(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get schema introspection interface if supported
    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        None
    }
}
