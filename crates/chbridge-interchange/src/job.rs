//! Transfer job lifecycle

use chbridge_core::{ColumnProjection, Endpoint};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Export,
    Import,
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job cannot move from {from:?} to {to:?}")]
pub struct JobStateError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One export, import or join from creation to its terminal state
#[derive(Debug, Clone, Serialize)]
pub struct TransferJob {
    id: Uuid,
    kind: TransferKind,
    source: Endpoint,
    destination: Endpoint,
    projection: Option<ColumnProjection>,
    status: JobStatus,
    error: Option<String>,
}

impl TransferJob {
    pub fn new(kind: TransferKind, source: Endpoint, destination: Endpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            destination,
            projection: None,
            status: JobStatus::Pending,
            error: None,
        }
    }

    pub fn with_projection(mut self, projection: ColumnProjection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    pub fn projection(&self) -> Option<&ColumnProjection> {
        self.projection.as_ref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Failure message once the job has failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobStateError> {
        let allowed = match (self.status, to) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending | JobStatus::Running, JobStatus::Failed | JobStatus::Cancelled) => {
                true
            }
            (JobStatus::Running, JobStatus::Completed) => true,
            _ => false,
        };
        if !allowed {
            return Err(JobStateError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Running)
    }

    /// Move to the terminal state matching an operation's result
    pub fn finish<T>(&mut self, result: &Result<T, TransferError>) -> Result<(), JobStateError> {
        match result {
            Ok(_) => self.transition(JobStatus::Completed),
            Err(e) if e.is_cancelled() => self.transition(JobStatus::Cancelled),
            Err(e) => {
                self.transition(JobStatus::Failed)?;
                self.error = Some(e.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chbridge_core::{DatabaseEndpoint, FlatFileEndpoint};

    fn job() -> TransferJob {
        TransferJob::new(
            TransferKind::Import,
            FlatFileEndpoint::new("/tmp/in.csv").into(),
            DatabaseEndpoint::clickhouse("localhost", 8123, "default").into(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        job.start().unwrap();
        job.finish(&Ok::<u64, TransferError>(3)).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.start().unwrap();
        job.finish(&Err::<(), _>(TransferError::Cancelled { rows_committed: 2 }))
            .unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);

        let err = job.start().unwrap_err();
        assert_eq!(err.from, JobStatus::Cancelled);
        assert!(job.finish(&Ok::<(), TransferError>(())).is_err());
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut job = job();
        assert!(job.finish(&Ok::<(), TransferError>(())).is_err());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn test_failure_records_message() {
        let mut job = job();
        job.start().unwrap();
        job.finish(&Err::<(), _>(TransferError::Query("boom".into())))
            .unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("query error: boom"));
    }
}
