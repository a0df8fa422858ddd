//! Delimited flat-file reading and writing

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chbridge_core::{
    ColumnDef, ColumnProjection, ColumnType, FlatFileEndpoint, Row, SchemaError, TableSchema,
};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};

use crate::error::{CoercionError, RejectReason, TransferError};
use crate::record_stream::{RecordSink, RecordStream};
use crate::value_encoding::{coerce_field, encode_value};

/// Table-like name for a file: its stem
fn file_table_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads a delimited file as typed rows.
///
/// Fields map to columns by position. A line whose field count differs from
/// the header, or whose field cannot be coerced, is rejected on its own and
/// reading continues with the next line.
pub struct FlatFileReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    header: Vec<String>,
    pending: Option<StringRecord>,
    record: StringRecord,
    positions: Vec<usize>,
    columns: Vec<ColumnDef>,
}

impl FlatFileReader {
    /// Open the file and read its header. Headerless files get columns
    /// named `c1`, `c2`, ... sized from the first line.
    #[tracing::instrument(skip(endpoint), fields(path = %endpoint.path().display()))]
    pub fn open(endpoint: &FlatFileEndpoint) -> Result<Self, TransferError> {
        let path = endpoint.path().to_path_buf();
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(endpoint.delimiter())
            .from_path(&path)
            .map_err(|e| TransferError::read(format!("opening {}: {}", path.display(), e)))?;

        let mut first = StringRecord::new();
        let has_first = reader
            .read_record(&mut first)
            .map_err(|e| TransferError::read(format!("reading {}: {}", path.display(), e)))?;

        let (header, pending) = match (has_first, endpoint.has_header()) {
            (false, _) => (Vec::new(), None),
            (true, true) => {
                let names = first
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let name = name.trim_start_matches('\u{feff}').trim();
                        if name.is_empty() {
                            format!("c{}", i + 1)
                        } else {
                            name.to_string()
                        }
                    })
                    .collect();
                (names, None)
            }
            (true, false) => {
                let names = (1..=first.len()).map(|i| format!("c{}", i)).collect();
                (names, Some(first))
            }
        };
        tracing::debug!(columns = header.len(), "flat file opened");

        let columns: Vec<ColumnDef> = header
            .iter()
            .map(|name| ColumnDef::new(name.clone(), ColumnType::Unknown))
            .collect();
        Ok(Self {
            path,
            reader,
            positions: (0..header.len()).collect(),
            header,
            pending,
            record: StringRecord::new(),
            columns,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file's columns as read from its header, all of unknown type
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            file_table_name(&self.path),
            self.header
                .iter()
                .map(|name| ColumnDef::new(name.clone(), ColumnType::Unknown))
                .collect(),
        )
    }

    /// Restrict and reorder the yielded columns
    pub fn project(mut self, projection: &ColumnProjection) -> Result<Self, SchemaError> {
        let schema = self.schema();
        self.positions = projection.positions(&schema)?;
        self.columns = projection.resolve(&schema)?;
        Ok(self)
    }

    /// Coerce projected fields to these types, in projection order
    pub fn with_column_types(mut self, types: &[ColumnType]) -> Self {
        for (column, ty) in self.columns.iter_mut().zip(types) {
            column.column_type = *ty;
        }
        self
    }

    /// Read up to `limit` well-formed rows, skipping rejected lines
    pub async fn sample(&mut self, limit: usize) -> Result<Vec<Row>, TransferError> {
        let mut rows = Vec::with_capacity(limit.min(1_024));
        while rows.len() < limit {
            match self.next().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(TransferError::Coercion(e)) => tracing::trace!(error = %e, "sample skipped line"),
                Err(e) => return Err(e),
            }
        }
        Ok(rows)
    }

    fn read_error(&self, error: csv::Error) -> TransferError {
        match error.kind() {
            csv::ErrorKind::Utf8 { pos, err } => TransferError::Coercion(CoercionError::for_line(
                pos.as_ref().map(|p| p.line()).unwrap_or_default(),
                RejectReason::Unreadable(err.to_string()),
            )),
            _ => TransferError::read(format!("reading {}: {}", self.path.display(), error)),
        }
    }

    fn decode_current(&self) -> Result<Row, TransferError> {
        let line = self.record.position().map(|p| p.line()).unwrap_or_default();
        let expected = self.header.len();
        let found = self.record.len();
        if found != expected {
            return Err(CoercionError::for_line(line, RejectReason::FieldCount { expected, found }).into());
        }

        let mut values = Vec::with_capacity(self.columns.len());
        for (column, &position) in self.columns.iter().zip(&self.positions) {
            let raw = self.record.get(position).unwrap_or_default();
            match coerce_field(raw, column.column_type) {
                Some(value) => values.push(value),
                None => {
                    return Err(
                        CoercionError::for_field(line, &column.name, raw, column.column_type).into(),
                    );
                }
            }
        }
        Ok(Row::new(values))
    }
}

#[async_trait]
impl RecordStream for FlatFileReader {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    async fn next(&mut self) -> Result<Option<Row>, TransferError> {
        if let Some(record) = self.pending.take() {
            self.record = record;
        } else {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(e) => return Err(self.read_error(e)),
            }
        }
        self.decode_current().map(Some)
    }
}

/// Header-derived schema of a flat file
pub fn describe_flat_file(endpoint: &FlatFileEndpoint) -> Result<TableSchema, TransferError> {
    Ok(FlatFileReader::open(endpoint)?.schema())
}

/// Writes rows as delimited text, quoting only fields that need it.
/// Each batch is flushed before it counts as committed.
pub struct FlatFileWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl FlatFileWriter {
    /// Create (truncate) the file and write the header if the endpoint has one
    pub fn create(endpoint: &FlatFileEndpoint, columns: &[ColumnDef]) -> Result<Self, TransferError> {
        let path = endpoint.path().to_path_buf();
        let mut writer = WriterBuilder::new()
            .delimiter(endpoint.delimiter())
            .quote_style(QuoteStyle::Necessary)
            .from_path(&path)
            .map_err(|e| TransferError::write(format!("creating {}: {}", path.display(), e)))?;

        if endpoint.has_header() {
            writer
                .write_record(columns.iter().map(|c| c.name.as_str()))
                .map_err(|e| TransferError::write(format!("writing {}: {}", path.display(), e)))?;
        }
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, error: impl std::fmt::Display) -> TransferError {
        TransferError::write(format!("writing {}: {}", self.path.display(), error))
    }
}

#[async_trait]
impl RecordSink for FlatFileWriter {
    async fn write_batch(&mut self, rows: &[Row]) -> Result<u64, TransferError> {
        for row in rows {
            if let Err(e) = self.writer.write_record(row.values.iter().map(encode_value)) {
                return Err(self.write_error(e));
            }
        }
        if let Err(e) = self.writer.flush() {
            return Err(self.write_error(e));
        }
        Ok(rows.len() as u64)
    }

    async fn finish(&mut self) -> Result<(), TransferError> {
        if let Err(e) = self.writer.flush() {
            return Err(self.write_error(e));
        }
        Ok(())
    }
}
