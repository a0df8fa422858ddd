//! Pull-based record sources and batch sinks
//!
//! Every transfer is a [`RecordStream`] drained into a [`RecordSink`] by
//! [`pump`](crate::transfer::pump). Streams are forward-only and yield rows in
//! source order.

use async_trait::async_trait;
use chbridge_core::{ColumnDef, Connection, Row, RowCursor};

use crate::error::TransferError;

/// A forward-only sequence of rows
#[async_trait]
pub trait RecordStream: Send {
    /// Columns of every row this stream yields, in order
    fn columns(&self) -> &[ColumnDef];

    /// Total row count when known up front
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Next row, or `None` at end of stream.
    ///
    /// A [`TransferError::Coercion`] rejects only the current row and the
    /// stream can be polled again. Any other error is final.
    async fn next(&mut self) -> Result<Option<Row>, TransferError>;
}

/// Destination of batched rows
#[async_trait]
pub trait RecordSink: Send {
    /// Write a batch, returning how many rows were committed
    async fn write_batch(&mut self, rows: &[Row]) -> Result<u64, TransferError>;

    /// Flush anything still buffered
    async fn finish(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Rows of a table read through a driver cursor
pub struct DatabaseReader {
    cursor: Box<dyn RowCursor>,
    total: Option<u64>,
}

impl DatabaseReader {
    pub fn new(cursor: Box<dyn RowCursor>) -> Self {
        Self {
            cursor,
            total: None,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

#[async_trait]
impl RecordStream for DatabaseReader {
    fn columns(&self) -> &[ColumnDef] {
        self.cursor.columns()
    }

    fn size_hint(&self) -> Option<u64> {
        self.total
    }

    async fn next(&mut self) -> Result<Option<Row>, TransferError> {
        self.cursor
            .next_row()
            .await
            .map_err(|e| TransferError::read(e.to_string()))
    }
}

/// Inserts batches into an existing table
pub struct DatabaseWriter<'a> {
    connection: &'a dyn Connection,
    table: String,
    columns: Vec<ColumnDef>,
}

impl<'a> DatabaseWriter<'a> {
    pub fn new(connection: &'a dyn Connection, table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            connection,
            table: table.into(),
            columns,
        }
    }
}

#[async_trait]
impl RecordSink for DatabaseWriter<'_> {
    async fn write_batch(&mut self, rows: &[Row]) -> Result<u64, TransferError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.connection
            .insert_rows(&self.table, &self.columns, rows)
            .await
            .map_err(|e| TransferError::write(format!("inserting into '{}': {}", self.table, e)))
    }
}
