//! Batch loop shared by export and import

use chbridge_core::Row;
use serde::Serialize;

use crate::error::{CoercionError, TransferError};
use crate::progress::ProgressTracker;
use crate::record_stream::{RecordSink, RecordStream};

/// Default rows per batch
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Rejections kept for the summary; the count covers the rest
pub const MAX_RECORDED_REJECTIONS: usize = 100;

/// What to do with a row the source rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnRejectedRow {
    /// Count it, record it and keep going
    Skip,
    /// Fail the transfer
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub written: u64,
    pub skipped: u64,
    /// First rejections, at most [`MAX_RECORDED_REJECTIONS`]
    pub rejections: Vec<CoercionError>,
}

impl TransferOutcome {
    fn reject(&mut self, error: CoercionError) {
        self.skipped += 1;
        if self.rejections.len() < MAX_RECORDED_REJECTIONS {
            self.rejections.push(error);
        }
    }
}

/// Drain `source` into `sink` in batches of `batch_size`.
///
/// Cancellation is checked before each batch is read, so a cancelled transfer
/// stops with every earlier batch committed and nothing after it. Failures
/// carry the number of rows committed before them.
pub async fn pump(
    source: &mut dyn RecordStream,
    sink: &mut dyn RecordSink,
    batch_size: usize,
    on_rejected: OnRejectedRow,
    tracker: &ProgressTracker,
) -> Result<TransferOutcome, TransferError> {
    let batch_size = batch_size.max(1);
    let mut outcome = TransferOutcome::default();
    let mut batch: Vec<Row> = Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE));
    let mut exhausted = false;

    while !exhausted {
        if tracker.is_cancelled() {
            tracing::info!(rows = outcome.written, "transfer cancelled");
            return Err(TransferError::Cancelled {
                rows_committed: outcome.written,
            });
        }

        batch.clear();
        while batch.len() < batch_size {
            match source.next().await {
                Ok(Some(row)) => batch.push(row),
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(TransferError::Coercion(e)) if on_rejected == OnRejectedRow::Skip => {
                    tracing::warn!(error = %e, "row skipped");
                    outcome.reject(e);
                }
                Err(e) => return Err(e.at(outcome.written)),
            }
        }

        if !batch.is_empty() {
            let committed = sink
                .write_batch(&batch)
                .await
                .map_err(|e| e.at(outcome.written))?;
            outcome.written += committed;
            tracing::debug!(batch = batch.len(), total = outcome.written, "batch committed");
        }
        tracker.advance(outcome.written, outcome.skipped);
        tokio::task::yield_now().await;
    }

    sink.finish().await.map_err(|e| e.at(outcome.written))?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chbridge_core::{ColumnDef, ColumnType, Value};

    use crate::error::RejectReason;

    /// Yields `total` rows; rows whose index is in `bad` are rejected
    struct Numbers {
        columns: Vec<ColumnDef>,
        next: u64,
        total: u64,
        bad: Vec<u64>,
        fail_at: Option<u64>,
    }

    impl Numbers {
        fn new(total: u64) -> Self {
            Self {
                columns: vec![ColumnDef::new("n", ColumnType::Integer)],
                next: 0,
                total,
                bad: Vec::new(),
                fail_at: None,
            }
        }
    }

    #[async_trait]
    impl RecordStream for Numbers {
        fn columns(&self) -> &[ColumnDef] {
            &self.columns
        }

        async fn next(&mut self) -> Result<Option<Row>, TransferError> {
            if self.next >= self.total {
                return Ok(None);
            }
            let n = self.next;
            self.next += 1;
            if self.fail_at == Some(n) {
                return Err(TransferError::read("connection reset"));
            }
            if self.bad.contains(&n) {
                return Err(CoercionError::for_line(n + 2, RejectReason::Unreadable("bad".into())).into());
            }
            Ok(Some(Row::new(vec![Value::Int64(n as i64)])))
        }
    }

    #[derive(Default)]
    struct Collect {
        rows: Vec<Row>,
        batches: usize,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl RecordSink for Collect {
        async fn write_batch(&mut self, rows: &[Row]) -> Result<u64, TransferError> {
            if self.fail_on_batch == Some(self.batches) {
                return Err(TransferError::write("disk full"));
            }
            self.batches += 1;
            self.rows.extend_from_slice(rows);
            Ok(rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_pump_batches_everything() {
        let mut source = Numbers::new(25);
        let mut sink = Collect::default();
        let outcome = pump(&mut source, &mut sink, 10, OnRejectedRow::Abort, &ProgressTracker::detached())
            .await
            .unwrap();

        assert_eq!(outcome.written, 25);
        assert_eq!(sink.batches, 3);
        assert_eq!(sink.rows.first().unwrap().values, vec![Value::Int64(0)]);
        assert_eq!(sink.rows.last().unwrap().values, vec![Value::Int64(24)]);
    }

    #[tokio::test]
    async fn test_pump_skips_rejected_rows() {
        let mut source = Numbers::new(10);
        source.bad = vec![3, 7];
        let mut sink = Collect::default();
        let outcome = pump(&mut source, &mut sink, 4, OnRejectedRow::Skip, &ProgressTracker::detached())
            .await
            .unwrap();

        assert_eq!(outcome.written, 8);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.written + outcome.skipped, 10);
        assert_eq!(outcome.rejections[0].line, 5);
    }

    #[tokio::test]
    async fn test_pump_aborts_on_rejection_when_asked() {
        let mut source = Numbers::new(10);
        source.bad = vec![5];
        let mut sink = Collect::default();
        let err = pump(&mut source, &mut sink, 4, OnRejectedRow::Abort, &ProgressTracker::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Coercion(_)));
        assert_eq!(sink.rows.len(), 4);
    }

    #[tokio::test]
    async fn test_write_failure_reports_committed_rows() {
        let mut source = Numbers::new(50);
        let mut sink = Collect {
            fail_on_batch: Some(2),
            ..Default::default()
        };
        let err = pump(&mut source, &mut sink, 10, OnRejectedRow::Abort, &ProgressTracker::detached())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Write { rows_committed: 20, .. }));
        assert_eq!(sink.rows.len(), 20);
    }

    #[tokio::test]
    async fn test_read_failure_reports_committed_rows() {
        let mut source = Numbers::new(50);
        source.fail_at = Some(15);
        let mut sink = Collect::default();
        let err = pump(&mut source, &mut sink, 10, OnRejectedRow::Abort, &ProgressTracker::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Read { rows_committed: 10, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let tracker = ProgressTracker::detached();
        tracker.cancellation_token().cancel();
        let mut source = Numbers::new(5);
        let mut sink = Collect::default();

        let err = pump(&mut source, &mut sink, 2, OnRejectedRow::Abort, &tracker)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::Cancelled { rows_committed: 0 });
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut source = Numbers::new(0);
        let mut sink = Collect::default();
        let outcome = pump(&mut source, &mut sink, 10, OnRejectedRow::Abort, &ProgressTracker::detached())
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::default());
        assert_eq!(sink.batches, 0);
    }
}
