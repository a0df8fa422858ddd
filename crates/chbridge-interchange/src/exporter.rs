//! Table to flat-file export

use chbridge_core::{
    ColumnProjection, Connection, FlatFileEndpoint, SchemaIntrospection, SelectRequest,
    TableSchema,
};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::flat_file::FlatFileWriter;
use crate::progress::ProgressTracker;
use crate::record_stream::DatabaseReader;
use crate::transfer::{DEFAULT_BATCH_SIZE, OnRejectedRow, pump};

/// Export tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub batch_size: usize,
    /// Count the table first so progress can report a percentage
    pub count_rows_first: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            count_rows_first: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub table: String,
    /// `None` exports every column in table order
    pub projection: Option<ColumnProjection>,
    pub destination: FlatFileEndpoint,
}

impl ExportRequest {
    pub fn new(table: impl Into<String>, destination: FlatFileEndpoint) -> Self {
        Self {
            table: table.into(),
            projection: None,
            destination,
        }
    }

    pub fn with_projection(mut self, projection: ColumnProjection) -> Self {
        self.projection = Some(projection);
        self
    }
}

pub(crate) fn introspection(
    connection: &dyn Connection,
) -> Result<&dyn SchemaIntrospection, TransferError> {
    connection.as_schema_introspection().ok_or_else(|| {
        TransferError::Query(format!(
            "driver '{}' does not support schema introspection",
            connection.driver_name()
        ))
    })
}

pub(crate) async fn describe(
    connection: &dyn Connection,
    table: &str,
) -> Result<TableSchema, TransferError> {
    Ok(introspection(connection)?.describe_table(table).await?)
}

/// Streams a table's rows into a delimited file
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    options: ExportOptions,
}

impl Exporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export and return the number of data rows written.
    ///
    /// Every projected column is checked against the table before the file is
    /// created. A failure part way leaves the rows written so far in the file;
    /// the error says the file is incomplete.
    #[tracing::instrument(
        skip(self, connection, request, tracker),
        fields(table = %request.table, path = %request.destination.path().display())
    )]
    pub async fn export(
        &self,
        connection: &dyn Connection,
        request: &ExportRequest,
        tracker: &ProgressTracker,
    ) -> Result<u64, TransferError> {
        let schema = describe(connection, &request.table).await?;
        let columns = match &request.projection {
            Some(projection) => projection.resolve(&schema)?,
            None => schema.columns.clone(),
        };
        if columns.is_empty() {
            return Err(chbridge_core::SchemaError::EmptyProjection.into());
        }

        let mut total = None;
        if self.options.count_rows_first {
            let count = connection.count_rows(&request.table).await?;
            tracker.set_total(count);
            total = Some(count);
        }
        if tracker.is_cancelled() {
            return Err(TransferError::Cancelled { rows_committed: 0 });
        }

        let mut writer = FlatFileWriter::create(&request.destination, &columns)?;
        let cursor = connection
            .select_stream(&SelectRequest::new(&request.table, columns.clone()))
            .await?;
        let mut reader = DatabaseReader::new(cursor);
        if let Some(count) = total {
            reader = reader.with_total(count);
        }

        tracing::info!(columns = columns.len(), total = ?total, "export started");
        let outcome = pump(
            &mut reader,
            &mut writer,
            self.options.batch_size,
            OnRejectedRow::Abort,
            tracker,
        )
        .await
        .map_err(|e| match e {
            TransferError::Write {
                message,
                rows_committed,
            } => TransferError::Write {
                message: format!("{}; the file is incomplete", message),
                rows_committed,
            },
            TransferError::Read {
                message,
                rows_committed,
            } => TransferError::Read {
                message: format!(
                    "{}; {} is incomplete",
                    message,
                    request.destination.path().display()
                ),
                rows_committed,
            },
            other => other,
        })?;

        tracing::info!(rows = outcome.written, "export finished");
        Ok(outcome.written)
    }
}
