//! Data movement between ClickHouse tables and delimited flat files
//!
//! # Architecture
//!
//! ```text
//! Table  → DatabaseReader ─┐            ┌─ FlatFileWriter → file   (export)
//!                          ├─ pump() ───┤
//! file   → FlatFileReader ─┘            └─ DatabaseWriter → table  (import)
//!
//! left ⋈ right ── JoinEngine ── INSERT ... SELECT ──→ target table (join)
//! ```
//!
//! Every operation takes a borrowed [`Connection`](chbridge_core::Connection)
//! and a [`ProgressTracker`]. Run through a [`ProgressReporter`] to get a
//! [`TransferHandle`] that streams progress events and can cancel.

mod error;
mod exporter;
mod flat_file;
mod importer;
mod inference;
mod job;
mod join;
mod preview;
mod progress;
mod record_stream;
mod transfer;
pub mod value_encoding;

pub use error::{CoercionError, JoinError, RejectReason, TransferError};
pub use exporter::{ExportOptions, ExportRequest, Exporter};
pub use flat_file::{FlatFileReader, FlatFileWriter, describe_flat_file};
pub use importer::{IfTableExists, ImportOptions, ImportRequest, ImportSummary, Importer};
pub use inference::{DEFAULT_SAMPLE_SIZE, TypeInference, infer_column_types};
pub use job::{JobStateError, JobStatus, TransferJob, TransferKind};
pub use join::{JoinEngine, JoinSpec, plan_join};
pub use preview::{DEFAULT_PREVIEW_ROWS, MAX_PREVIEW_ROWS, Preview, PreviewOptions, Previewer};
pub use progress::{
    DEFAULT_EVENT_CAPACITY, Percent, ProgressEvent, ProgressReporter, ProgressTracker,
    TransferHandle, TransferStatus,
};
pub use record_stream::{DatabaseReader, DatabaseWriter, RecordSink, RecordStream};
pub use transfer::{
    DEFAULT_BATCH_SIZE, MAX_RECORDED_REJECTIONS, OnRejectedRow, TransferOutcome, pump,
};
