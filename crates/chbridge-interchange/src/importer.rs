//! Flat-file to table import

use chbridge_core::{
    ColumnDef, ColumnProjection, ColumnType, Connection, FlatFileEndpoint, TableSchema,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoercionError, TransferError};
use crate::exporter::{describe, introspection};
use crate::flat_file::FlatFileReader;
use crate::inference::{DEFAULT_SAMPLE_SIZE, infer_column_types};
use crate::progress::ProgressTracker;
use crate::record_stream::DatabaseWriter;
use crate::transfer::{DEFAULT_BATCH_SIZE, OnRejectedRow, pump};

/// Behavior when the destination table already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfTableExists {
    /// Add rows to the existing table
    #[default]
    Append,
    /// Empty the table first
    Truncate,
    /// Refuse to import
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub batch_size: usize,
    /// Data rows sampled to infer column types for a new table
    pub sample_size: usize,
    pub if_table_exists: IfTableExists,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            if_table_exists: IfTableExists::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: FlatFileEndpoint,
    /// `None` imports every column of the file
    pub projection: Option<ColumnProjection>,
    pub table: String,
}

impl ImportRequest {
    pub fn new(source: FlatFileEndpoint, table: impl Into<String>) -> Self {
        Self {
            source,
            projection: None,
            table: table.into(),
        }
    }

    pub fn with_projection(mut self, projection: ColumnProjection) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Result of a completed import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub written: u64,
    pub skipped: u64,
    /// First rejected rows with line numbers
    pub rejections: Vec<CoercionError>,
    pub table_created: bool,
}

/// Loads a delimited file into a table
#[derive(Debug, Clone, Default)]
pub struct Importer {
    options: ImportOptions,
}

impl Importer {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import the file, skipping rows that are malformed or do not coerce to
    /// the destination's column types.
    ///
    /// A missing table is created from types inferred over a sample of the
    /// file. An existing table must contain every projected column.
    #[tracing::instrument(
        skip(self, connection, request, tracker),
        fields(path = %request.source.path().display(), table = %request.table)
    )]
    pub async fn import(
        &self,
        connection: &dyn Connection,
        request: &ImportRequest,
        tracker: &ProgressTracker,
    ) -> Result<ImportSummary, TransferError> {
        let reader = FlatFileReader::open(&request.source)?;
        let projection = match &request.projection {
            Some(projection) => projection.clone(),
            None => ColumnProjection::all(&reader.schema())?,
        };
        let reader = reader.project(&projection)?;

        let exists = introspection(connection)?
            .table_exists(&request.table)
            .await?;
        let (columns, table_created) = if exists {
            let columns = self.existing_columns(connection, request, &projection).await?;
            (columns, false)
        } else {
            let columns = self.inferred_columns(&request.source, &projection).await?;
            if tracker.is_cancelled() {
                return Err(TransferError::Cancelled { rows_committed: 0 });
            }
            connection
                .create_table(&TableSchema::new(&request.table, columns.clone()))
                .await?;
            tracing::info!(columns = columns.len(), "table created from inferred types");
            (columns, true)
        };

        let types: Vec<ColumnType> = columns.iter().map(|c| c.column_type).collect();
        let mut reader = reader.with_column_types(&types);
        let mut writer = DatabaseWriter::new(connection, &request.table, columns);

        let outcome = pump(
            &mut reader,
            &mut writer,
            self.options.batch_size,
            OnRejectedRow::Skip,
            tracker,
        )
        .await?;

        tracing::info!(
            written = outcome.written,
            skipped = outcome.skipped,
            "import finished"
        );
        Ok(ImportSummary {
            written: outcome.written,
            skipped: outcome.skipped,
            rejections: outcome.rejections,
            table_created,
        })
    }

    async fn existing_columns(
        &self,
        connection: &dyn Connection,
        request: &ImportRequest,
        projection: &ColumnProjection,
    ) -> Result<Vec<ColumnDef>, TransferError> {
        if self.options.if_table_exists == IfTableExists::Fail {
            return Err(TransferError::TableExists(request.table.clone()));
        }
        let schema = describe(connection, &request.table).await?;
        let columns = projection.resolve(&schema)?;
        if self.options.if_table_exists == IfTableExists::Truncate {
            tracing::info!("truncating destination table");
            connection.truncate_table(&request.table).await?;
        }
        Ok(columns)
    }

    async fn inferred_columns(
        &self,
        source: &FlatFileEndpoint,
        projection: &ColumnProjection,
    ) -> Result<Vec<ColumnDef>, TransferError> {
        let mut sampler = FlatFileReader::open(source)?.project(projection)?;
        let sample = sampler.sample(self.options.sample_size).await?;
        let types = infer_column_types(projection.len(), &sample);
        tracing::debug!(rows = sample.len(), ?types, "sampled column types");
        Ok(projection
            .iter()
            .zip(types)
            .map(|(name, ty)| ColumnDef::new(name, ty))
            .collect())
    }
}
