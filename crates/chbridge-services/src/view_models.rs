//! View models returned by the services
//!
//! These are serializable DTOs for whatever surface calls the engine.

use chbridge_core::{ColumnDef, DatabaseEndpoint, TableInfo, TableSchema};
use chbridge_interchange::{
    CoercionError, ImportSummary, Percent, Preview, ProgressEvent, TransferStatus,
};
use serde::Serialize;
use uuid::Uuid;

/// A verified database endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub driver: String,
    pub url: String,
    pub database: String,
    pub username: String,
}

impl ConnectionInfo {
    pub fn new(endpoint: &DatabaseEndpoint) -> Self {
        Self {
            driver: endpoint.driver().to_string(),
            url: endpoint.url(),
            database: endpoint.database().to_string(),
            username: endpoint.username().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub engine: Option<String>,
    pub row_count: Option<u64>,
}

impl From<TableInfo> for TableSummary {
    fn from(info: TableInfo) -> Self {
        Self {
            name: info.name,
            engine: info.engine,
            row_count: info.row_count,
        }
    }
}

/// Column information for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine type category, e.g. `Integer`
    pub column_type: String,
    /// Native type as the source declares it, e.g. `Nullable(Int64)`
    pub data_type: Option<String>,
    pub nullable: bool,
}

impl From<&ColumnDef> for ColumnInfo {
    fn from(column: &ColumnDef) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.column_type.as_str().to_string(),
            data_type: column.data_type.clone(),
            nullable: column.nullable,
        }
    }
}

/// Ordered columns of a table or flat file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDetails {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl From<&TableSchema> for TableDetails {
    fn from(schema: &TableSchema) -> Self {
        Self {
            name: schema.name.clone(),
            columns: schema.columns.iter().map(ColumnInfo::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub table: String,
    pub path: String,
    pub rows_written: u64,
}

/// One rejected input line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub line: u64,
    pub column: Option<String>,
    pub value: String,
    pub reason: String,
}

impl From<&CoercionError> for RejectedRow {
    fn from(error: &CoercionError) -> Self {
        Self {
            line: error.line,
            column: error.column.clone(),
            value: error.value.clone(),
            reason: error.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub table: String,
    pub path: String,
    pub written: u64,
    pub skipped: u64,
    pub table_created: bool,
    /// The first rejections only; `skipped` counts all of them
    pub rejections: Vec<RejectedRow>,
}

impl ImportReport {
    pub fn new(table: impl Into<String>, path: impl Into<String>, summary: &ImportSummary) -> Self {
        Self {
            table: table.into(),
            path: path.into(),
            written: summary.written,
            skipped: summary.skipped,
            table_created: summary.table_created,
            rejections: summary.rejections.iter().map(RejectedRow::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinReport {
    pub target: String,
    pub rows_written: u64,
}

/// Sample rows rendered as text, `NULL` for nulls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewData {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<String>>,
}

impl From<Preview> for PreviewData {
    fn from(preview: Preview) -> Self {
        Self {
            columns: preview.columns.iter().map(ColumnInfo::from).collect(),
            rows: preview
                .rows
                .iter()
                .map(|row| row.values.iter().map(ToString::to_string).collect())
                .collect(),
        }
    }
}

/// Progress event flattened for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub job_id: Uuid,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    /// `None` when the total is not known in advance
    pub percent: Option<f64>,
    pub status: &'static str,
    pub error: Option<String>,
}

impl From<&ProgressEvent> for ProgressView {
    fn from(event: &ProgressEvent) -> Self {
        let (status, error) = match &event.status {
            TransferStatus::Running => ("running", None),
            TransferStatus::Completed => ("completed", None),
            TransferStatus::Failed(message) => ("failed", Some(message.clone())),
            TransferStatus::Cancelled => ("cancelled", None),
        };
        Self {
            job_id: event.job_id,
            rows_processed: event.rows_processed,
            rows_skipped: event.rows_skipped,
            percent: match event.percent {
                Percent::Known(p) => Some(p),
                Percent::Unknown => None,
            },
            status,
            error,
        }
    }
}
