//! Transfer error taxonomy

use std::fmt;

use chbridge_core::{BridgeError, ColumnType, ConnectionError, SchemaError};
use serde::Serialize;
use thiserror::Error;

/// Why a single flat-file row could not be turned into a typed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Field count differs from the header width
    FieldCount { expected: usize, found: usize },
    /// The field does not parse as the column's type
    TypeMismatch(ColumnType),
    /// The line could not be decoded at all (bad quoting, invalid UTF-8)
    Unreadable(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            RejectReason::TypeMismatch(ty) => write!(f, "not a valid {}", ty),
            RejectReason::Unreadable(detail) => write!(f, "unreadable line: {}", detail),
        }
    }
}

/// A rejected flat-file row
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoercionError {
    /// 1-based line number in the file
    pub line: u64,
    pub column: Option<String>,
    /// Raw field text, empty when the whole line was rejected
    pub value: String,
    pub reason: RejectReason,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)?;
        if let Some(column) = &self.column {
            write!(f, ", column '{}' = '{}'", column, self.value)?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl CoercionError {
    pub fn for_line(line: u64, reason: RejectReason) -> Self {
        Self {
            line,
            column: None,
            value: String::new(),
            reason,
        }
    }

    pub fn for_field(
        line: u64,
        column: impl Into<String>,
        value: impl Into<String>,
        expected: ColumnType,
    ) -> Self {
        Self {
            line,
            column: Some(column.into()),
            value: value.into(),
            reason: RejectReason::TypeMismatch(expected),
        }
    }
}

/// Join specification problems, detected before anything is executed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("invalid join predicate: {0}")]
    InvalidPredicate(String),

    #[error("column '{column}' exists in both '{left}' and '{right}'; qualify it")]
    AmbiguousColumn {
        column: String,
        left: String,
        right: String,
    },

    #[error("column '{0}' is not a column of either joined table")]
    UnknownColumn(String),

    #[error("cannot join table '{0}' with itself")]
    SameTable(String),
}

/// Every way a transfer can end other than success
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("join error: {0}")]
    Join(#[from] JoinError),

    /// The server or file refused the operation before any row moved
    #[error("query error: {0}")]
    Query(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("read failed after {rows_committed} rows: {message}")]
    Read { message: String, rows_committed: u64 },

    #[error("write failed after {rows_committed} rows: {message}")]
    Write { message: String, rows_committed: u64 },

    #[error("rejected row at {0}")]
    Coercion(#[from] CoercionError),

    #[error("cancelled after {rows_committed} rows")]
    Cancelled { rows_committed: u64 },
}

impl TransferError {
    pub fn read(message: impl Into<String>) -> Self {
        TransferError::Read {
            message: message.into(),
            rows_committed: 0,
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        TransferError::Write {
            message: message.into(),
            rows_committed: 0,
        }
    }

    /// Rows durably written before the failure
    pub fn rows_committed(&self) -> u64 {
        match self {
            TransferError::Read { rows_committed, .. }
            | TransferError::Write { rows_committed, .. }
            | TransferError::Cancelled { rows_committed } => *rows_committed,
            _ => 0,
        }
    }

    /// Stamp the committed row count onto mid-stream failures
    pub fn at(self, committed: u64) -> Self {
        match self {
            TransferError::Read { message, .. } => TransferError::Read {
                message,
                rows_committed: committed,
            },
            TransferError::Write { message, .. } => TransferError::Write {
                message,
                rows_committed: committed,
            },
            TransferError::Cancelled { .. } => TransferError::Cancelled {
                rows_committed: committed,
            },
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled { .. })
    }

    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Connection(_) => "connection",
            TransferError::Schema(_) => "schema",
            TransferError::Join(_) => "join",
            TransferError::Query(_) => "query",
            TransferError::TableExists(_) => "table_exists",
            TransferError::Read { .. } => "read",
            TransferError::Write { .. } => "write",
            TransferError::Coercion(_) => "coercion",
            TransferError::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<BridgeError> for TransferError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Connection(e) => TransferError::Connection(e),
            BridgeError::Schema(e) => TransferError::Schema(e),
            BridgeError::Cancelled => TransferError::Cancelled { rows_committed: 0 },
            other => TransferError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stamps_only_mid_stream_errors() {
        let err = TransferError::write("disk full").at(1_000);
        assert_eq!(err.rows_committed(), 1_000);

        let err = TransferError::Query("syntax".into()).at(5);
        assert_eq!(err.rows_committed(), 0);
    }

    #[test]
    fn test_bridge_errors_keep_their_category() {
        let err: TransferError = BridgeError::Schema(SchemaError::NotFound("t".into())).into();
        assert_eq!(err.kind(), "schema");

        let err: TransferError =
            BridgeError::Connection(ConnectionError::Unreachable("down".into())).into();
        assert_eq!(err.kind(), "connection");

        let err: TransferError = BridgeError::Driver("boom".into()).into();
        assert_eq!(err.kind(), "query");
    }

    #[test]
    fn test_coercion_message_names_line_and_column() {
        let err = CoercionError::for_field(7, "qty", "abc", ColumnType::Integer);
        assert_eq!(
            err.to_string(),
            "line 7, column 'qty' = 'abc': not a valid Integer"
        );

        let err = CoercionError::for_line(3, RejectReason::FieldCount { expected: 3, found: 2 });
        assert_eq!(err.to_string(), "line 3: expected 3 fields, found 2");
    }
}
