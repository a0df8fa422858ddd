//! Progress reporting and cancellation for running transfers
//!
//! A [`ProgressTracker`] is handed to the operation; a [`TransferHandle`] is
//! handed to the caller. Intermediate events go through a bounded channel
//! with `try_send` and are dropped when the consumer lags. The terminal event
//! is always delivered.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransferError;
use crate::job::TransferJob;

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Percent {
    Known(f64),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum TransferStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub percent: Percent,
    pub status: TransferStatus,
}

#[derive(Debug, Default)]
struct Counters {
    total: Option<u64>,
    processed: u64,
    skipped: u64,
}

/// Operation-side view of a transfer's progress
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    job_id: Uuid,
    sender: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancellationToken,
    counters: Arc<Mutex<Counters>>,
}

impl ProgressTracker {
    /// A tracker nobody listens to, for synchronous callers
    pub fn detached() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            sender: None,
            cancel: CancellationToken::new(),
            counters: Arc::default(),
        }
    }

    fn channel(job_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tracker = Self {
            job_id,
            sender: Some(tx),
            cancel: CancellationToken::new(),
            counters: Arc::default(),
        };
        (tracker, rx)
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Set the expected row count once it is known
    pub fn set_total(&self, total: u64) {
        self.counters.lock().total = Some(total);
    }

    pub fn rows_processed(&self) -> u64 {
        self.counters.lock().processed
    }

    /// Report the operation has started
    pub fn begin(&self) {
        self.emit(TransferStatus::Running);
    }

    /// Record cumulative counts and emit a running event.
    /// Counts never move backwards.
    pub fn advance(&self, processed: u64, skipped: u64) {
        {
            let mut counters = self.counters.lock();
            counters.processed = counters.processed.max(processed);
            counters.skipped = counters.skipped.max(skipped);
        }
        self.emit(TransferStatus::Running);
    }

    fn event(&self, status: TransferStatus) -> ProgressEvent {
        let counters = self.counters.lock();
        let percent = match (counters.total, &status) {
            (Some(0), _) => Percent::Known(100.0),
            (Some(total), TransferStatus::Completed) if counters.processed >= total => {
                Percent::Known(100.0)
            }
            (Some(total), _) => {
                Percent::Known((counters.processed as f64 / total as f64 * 100.0).min(100.0))
            }
            (None, _) => Percent::Unknown,
        };
        ProgressEvent {
            job_id: self.job_id,
            rows_processed: counters.processed,
            rows_skipped: counters.skipped,
            percent,
            status,
        }
    }

    fn emit(&self, status: TransferStatus) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(self.event(status)) {
            tracing::trace!(job_id = %self.job_id, "progress consumer lagging, event dropped");
        }
    }

    /// Deliver the terminal event, waiting for channel capacity
    async fn finish(&self, status: TransferStatus) {
        if let Some(sender) = &self.sender {
            // A closed channel means nobody is listening any more
            let _ = sender.send(self.event(status)).await;
        }
    }
}

/// Runs transfers in the background and wires up their event channels
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    capacity: usize,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ProgressReporter {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Spawn `operation` for `job` and return a handle to observe or cancel it.
    ///
    /// The job moves to `Running` before the operation starts and to its
    /// terminal state after; the last event on the handle always carries that
    /// terminal status.
    pub fn start<T, F, Fut>(&self, job: TransferJob, operation: F) -> TransferHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(ProgressTracker) -> Fut,
        Fut: Future<Output = Result<T, TransferError>> + Send + 'static,
    {
        let job_id = job.id();
        let kind = job.kind();
        let (tracker, events) = ProgressTracker::channel(job_id, self.capacity);
        let cancel = tracker.cancellation_token().clone();
        let run = operation(tracker.clone());
        let shared = Arc::new(Mutex::new(job));
        let state = shared.clone();

        let task = tokio::spawn(async move {
            let started = state.lock().start();
            if let Err(e) = started {
                tracing::error!(%job_id, error = %e, "job could not start");
            }
            tracker.begin();

            let result = run.await;
            let status = match &result {
                Ok(_) => TransferStatus::Completed,
                Err(e) if e.is_cancelled() => TransferStatus::Cancelled,
                Err(e) => TransferStatus::Failed(e.to_string()),
            };
            let finished = state.lock().finish(&result);
            if let Err(e) = finished {
                tracing::error!(%job_id, error = %e, "job state not updated");
            }
            match &result {
                Ok(_) => tracing::info!(%job_id, ?kind, rows = tracker.rows_processed(), "transfer completed"),
                Err(e) => tracing::warn!(%job_id, ?kind, error = %e, "transfer ended early"),
            }
            tracker.finish(status).await;
            result
        });

        TransferHandle {
            job_id,
            job: shared,
            events,
            cancel,
            task,
        }
    }
}

/// Caller-side view of a running transfer.
///
/// Also a [`Stream`] of its progress events.
pub struct TransferHandle<T> {
    job_id: Uuid,
    job: Arc<Mutex<TransferJob>>,
    events: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<T, TransferError>>,
}

impl<T> TransferHandle<T> {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Snapshot of the job, including its current lifecycle state. The job is
    /// already terminal when the terminal event is received.
    pub fn job(&self) -> TransferJob {
        self.job.lock().clone()
    }

    /// Request cancellation. Takes effect at the next batch boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next progress event; `None` once the terminal event has been taken
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Wait for the transfer to finish, discarding unread events
    pub async fn outcome(self) -> Result<T, TransferError> {
        drop(self.events);
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TransferError::Cancelled { rows_committed: 0 }),
            Err(e) => Err(TransferError::Query(format!("transfer task panicked: {}", e))),
        }
    }
}

impl<T> Stream for TransferHandle<T> {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, TransferKind};
    use chbridge_core::{DatabaseEndpoint, Endpoint, FlatFileEndpoint};
    use futures::StreamExt;

    fn job() -> TransferJob {
        TransferJob::new(
            TransferKind::Export,
            DatabaseEndpoint::clickhouse("localhost", 8123, "default").into(),
            FlatFileEndpoint::new("/tmp/out.csv").into(),
        )
    }

    #[tokio::test]
    async fn test_events_end_with_completed() {
        let reporter = ProgressReporter::default();
        let handle = reporter.start(job(), |tracker| async move {
            tracker.set_total(4);
            tracker.advance(2, 0);
            tracker.advance(4, 0);
            Ok(4u64)
        });

        let events: Vec<ProgressEvent> = handle.collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.status, TransferStatus::Completed);
        assert_eq!(last.rows_processed, 4);
        assert_eq!(last.percent, Percent::Known(100.0));
        assert!(events[..events.len() - 1].iter().all(|e| !e.status.is_terminal()));
    }

    #[tokio::test]
    async fn test_counts_are_monotonic() {
        let reporter = ProgressReporter::default();
        let handle = reporter.start(job(), |tracker| async move {
            tracker.advance(10, 1);
            tracker.advance(5, 0);
            Ok(())
        });

        let events: Vec<ProgressEvent> = handle.collect().await;
        for pair in events.windows(2) {
            assert!(pair[1].rows_processed >= pair[0].rows_processed);
            assert!(pair[1].rows_skipped >= pair[0].rows_skipped);
        }
        assert_eq!(events.last().unwrap().rows_processed, 10);
    }

    #[tokio::test]
    async fn test_unknown_total_reports_unknown_percent() {
        let reporter = ProgressReporter::default();
        let handle = reporter.start(job(), |tracker| async move {
            tracker.advance(3, 0);
            Ok(())
        });
        let events: Vec<ProgressEvent> = handle.collect().await;
        assert!(events.iter().all(|e| e.percent == Percent::Unknown));
    }

    #[tokio::test]
    async fn test_failure_is_terminal_event() {
        let reporter = ProgressReporter::default();
        let mut handle = reporter.start(job(), |_| async move {
            Err::<(), _>(TransferError::write("disk full").at(7))
        });

        let mut last = None;
        while let Some(event) = handle.next_event().await {
            last = Some(event);
        }
        assert!(matches!(
            last.unwrap().status,
            TransferStatus::Failed(message) if message.contains("disk full")
        ));
        assert_eq!(handle.outcome().await.unwrap_err().rows_committed(), 7);
    }

    #[tokio::test]
    async fn test_cancel_reaches_operation() {
        let reporter = ProgressReporter::default();
        let mut handle = reporter.start(job(), |tracker| async move {
            loop {
                if tracker.is_cancelled() {
                    return Err::<(), _>(TransferError::Cancelled {
                        rows_committed: tracker.rows_processed(),
                    });
                }
                tracker.advance(tracker.rows_processed() + 1, 0);
                tokio::task::yield_now().await;
            }
        });

        let first = handle.next_event().await.unwrap();
        assert_eq!(first.status, TransferStatus::Running);
        handle.cancel();

        let mut last = first;
        while let Some(event) = handle.next_event().await {
            last = event;
        }
        assert_eq!(last.status, TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_event_survives_full_channel() {
        let reporter = ProgressReporter::new(1);
        let handle = reporter.start(job(), |tracker| async move {
            for i in 1..=100 {
                tracker.advance(i, 0);
            }
            Ok(())
        });
        tokio::task::yield_now().await;

        let events: Vec<ProgressEvent> = handle.collect().await;
        assert_eq!(events.last().unwrap().status, TransferStatus::Completed);
        assert!(events.len() < 100);
    }

    #[tokio::test]
    async fn test_outcome_without_reading_events() {
        let reporter = ProgressReporter::new(1);
        let handle = reporter.start(job(), |tracker| async move {
            tracker.advance(1, 0);
            tracker.advance(2, 0);
            Ok(2u64)
        });
        assert_eq!(handle.outcome().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_handle_tracks_job_lifecycle() {
        let reporter = ProgressReporter::default();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let mut handle = reporter.start(job(), |_| async move {
            let _ = wait.await;
            Err::<(), _>(TransferError::write("disk full"))
        });
        assert_eq!(handle.job().kind(), TransferKind::Export);

        let first = handle.next_event().await.unwrap();
        assert_eq!(first.status, TransferStatus::Running);
        assert_eq!(handle.job().status(), JobStatus::Running);

        release.send(()).unwrap();
        while handle.next_event().await.is_some() {}
        let job = handle.job();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("disk full"));
        assert!(matches!(job.destination(), Endpoint::FlatFile(_)));
    }

    #[test]
    fn test_job_status_mirrors_transfer_status() {
        let mut job = job();
        job.start().unwrap();
        job.finish(&Ok::<(), TransferError>(())).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
    }
}
