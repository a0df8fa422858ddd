//! Bounded previews of tables and flat files

use chbridge_core::{
    ColumnDef, ColumnProjection, Connection, FlatFileEndpoint, Row, SelectRequest,
};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::exporter::describe;
use crate::flat_file::FlatFileReader;
use crate::record_stream::RecordStream;

pub const DEFAULT_PREVIEW_ROWS: usize = 100;
pub const MAX_PREVIEW_ROWS: usize = 10_000;

/// First rows of a source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
    /// Rows returned when the caller does not ask for a count
    pub default_rows: usize,
    /// Upper bound on `default_rows`. An explicit limit is never capped.
    pub max_rows: usize,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            default_rows: DEFAULT_PREVIEW_ROWS,
            max_rows: MAX_PREVIEW_ROWS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Previewer {
    options: PreviewOptions,
}

impl Previewer {
    pub fn new(options: PreviewOptions) -> Self {
        Self { options }
    }

    /// Requested row count, or the default bounded by the maximum
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or_else(|| self.options.default_rows.min(self.options.max_rows))
    }

    /// Up to `limit` rows of a table. Never reads past the limit.
    #[tracing::instrument(skip(self, connection, projection))]
    pub async fn preview_table(
        &self,
        connection: &dyn Connection,
        table: &str,
        projection: Option<&ColumnProjection>,
        limit: Option<usize>,
    ) -> Result<Preview, TransferError> {
        let schema = describe(connection, table).await?;
        let columns = match projection {
            Some(projection) => projection.resolve(&schema)?,
            None => schema.columns,
        };
        let limit = self.effective_limit(limit);
        if limit == 0 {
            return Ok(Preview {
                columns,
                rows: Vec::new(),
            });
        }

        let request = SelectRequest::new(table, columns.clone()).with_limit(limit as u64);
        let mut cursor = connection.select_stream(&request).await?;
        let mut rows = Vec::with_capacity(limit.min(self.options.max_rows));
        while rows.len() < limit {
            match cursor.next_row().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(Preview { columns, rows })
    }

    /// Up to `limit` well-formed rows of a flat file, as text
    #[tracing::instrument(skip(self, endpoint, projection), fields(path = %endpoint.path().display()))]
    pub async fn preview_flat_file(
        &self,
        endpoint: &FlatFileEndpoint,
        projection: Option<&ColumnProjection>,
        limit: Option<usize>,
    ) -> Result<Preview, TransferError> {
        let mut reader = FlatFileReader::open(endpoint)?;
        if let Some(projection) = projection {
            reader = reader.project(projection)?;
        }
        let rows = reader.sample(self.effective_limit(limit)).await?;
        Ok(Preview {
            columns: reader.columns().to_vec(),
            rows,
        })
    }
}
