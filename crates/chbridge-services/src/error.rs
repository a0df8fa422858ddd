use chbridge_core::{BridgeError, ConnectionError, SchemaError};
use chbridge_interchange::{JoinError, TransferError};
use thiserror::Error;

use crate::config::ConfigError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service-level errors with user-friendly messages
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Connection failed: {0}")]
    Connection(ConnectionError),

    #[error("Schema error: {0}")]
    Schema(SchemaError),

    #[error("Join rejected: {0}")]
    Join(JoinError),

    #[error("Transfer failed: {0}")]
    Transfer(TransferError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Stable machine-readable name of the failure
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Connection(e) => match e {
                ConnectionError::Unreachable(_) => "unreachable",
                ConnectionError::AuthRejected(_) => "auth_rejected",
                ConnectionError::Timeout(_) => "timeout",
            },
            ServiceError::Schema(e) => match e {
                SchemaError::NotFound(_) => "not_found",
                SchemaError::UnknownColumn { .. } => "unknown_column",
                SchemaError::AmbiguousColumn { .. } => "ambiguous_column",
                SchemaError::EmptyProjection => "empty_projection",
                SchemaError::DuplicateColumn(_) => "duplicate_column",
            },
            ServiceError::Join(e) => match e {
                JoinError::InvalidPredicate(_) => "invalid_predicate",
                JoinError::AmbiguousColumn { .. } => "ambiguous_column",
                JoinError::UnknownColumn(_) => "unknown_column",
                JoinError::SameTable(_) => "same_table",
            },
            ServiceError::Transfer(e) => e.kind(),
            ServiceError::Config(_) => "configuration",
        }
    }

    /// Rows already committed to the destination when the transfer stopped
    pub fn rows_committed(&self) -> u64 {
        match self {
            ServiceError::Transfer(e) => e.rows_committed(),
            _ => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Transfer(e) if e.is_cancelled())
    }
}

impl From<TransferError> for ServiceError {
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::Connection(e) => ServiceError::Connection(e),
            TransferError::Schema(e) => ServiceError::Schema(e),
            TransferError::Join(e) => ServiceError::Join(e),
            other => ServiceError::Transfer(other),
        }
    }
}

impl From<BridgeError> for ServiceError {
    fn from(error: BridgeError) -> Self {
        TransferError::from(error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_names_the_failure() {
        let err: ServiceError = BridgeError::Connection(ConnectionError::Timeout(Duration::from_secs(1))).into();
        assert_eq!(err.kind(), "timeout");

        let err: ServiceError = TransferError::Schema(SchemaError::NotFound("orders".into())).into();
        assert_eq!(err.kind(), "not_found");

        let err: ServiceError = TransferError::Join(JoinError::InvalidPredicate("x".into())).into();
        assert_eq!(err.kind(), "invalid_predicate");

        let err: ServiceError = TransferError::write("disk full").at(40).into();
        assert_eq!(err.kind(), "write");
        assert_eq!(err.rows_committed(), 40);
    }

    #[test]
    fn test_cancelled_is_reported() {
        let err: ServiceError = TransferError::Cancelled { rows_committed: 3 }.into();
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), "cancelled");
    }
}
