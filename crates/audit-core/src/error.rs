//! Error taxonomy for recording and querying.

use audit_types::{AuditAction, LedgerError, TxId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The mutation an audit write was for, kept so a failed write can be logged or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationParams {
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    pub snapshot: serde_json::Value,
}

/// Why one append attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("append timed out after {0:?}")]
    TimedOut(Duration),
}

/// Terminal write failure: retries exhausted or a non-retryable ledger error.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditWriteFailed {
    pub mutation: MutationParams,
    pub attempts: u32,
    pub last_error: AttemptFailure,
}

/// Outcome of a write whose caller cancelled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CommitStatus {
    /// The append completed; the record exists.
    Committed { tx_id: TxId },
    /// No attempt was in flight; every issued attempt is known to have failed.
    NotCommitted,
    /// An attempt was abandoned in flight; the ledger may or may not hold the record.
    Indeterminate,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitStatus::Committed { tx_id } => write!(f, "committed as tx {}", tx_id),
            CommitStatus::NotCommitted => f.write_str("not committed"),
            CommitStatus::Indeterminate => f.write_str("commit status indeterminate"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("unknown entity kind: {0:?}")]
    UnknownEntity(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
    #[error(
        "audit write for {} {}#{} failed after {} attempt(s): {}",
        .0.mutation.action, .0.mutation.entity, .0.mutation.entity_id, .0.attempts, .0.last_error
    )]
    WriteFailed(Box<AuditWriteFailed>),
    #[error("audit write cancelled: {0}")]
    WriteCancelled(CommitStatus),
    #[error("audit query failed: {0}")]
    Query(#[source] LedgerError),
    #[error("audit query timed out after {0:?}")]
    QueryTimeout(Duration),
    #[error("audit query cancelled")]
    QueryCancelled,
}

impl AuditError {
    /// True for read timeouts and for writes whose last attempt timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            AuditError::QueryTimeout(_) => true,
            AuditError::WriteFailed(f) => matches!(f.last_error, AttemptFailure::TimedOut(_)),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuditError::WriteCancelled(_) | AuditError::QueryCancelled)
    }

    /// Caller or programming defects: retrying the same call cannot succeed.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, AuditError::UnknownEntity(_) | AuditError::Encode(_))
    }
}
