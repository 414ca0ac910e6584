//! Ledger adapter trait and its error type.

use crate::{Fields, LedgerQuery, Row, TxId};
use async_trait::async_trait;

/// Capability boundary around an append-only ledger.
///
/// Implementations assign strictly increasing transaction ids per namespace and never update or
/// remove appended rows. Handles must be safe to share across tasks.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Establish (or re-establish) a session. Idempotent.
    async fn connect(&self) -> Result<(), LedgerError>;

    /// Bind subsequent operations to a logical database. Fails if the namespace does not exist.
    async fn select_namespace(&self, name: &str) -> Result<(), LedgerError>;

    /// Insert one row; returns the ledger-assigned transaction id.
    async fn append(&self, table: &str, fields: &Fields) -> Result<TxId, LedgerError>;

    /// Run a parameterized read. Rows are fully materialized, values in projection order.
    async fn query(&self, query: &LedgerQuery) -> Result<Vec<Row>, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger connection error: {0}")]
    Connection(String),
    #[error("ledger namespace error: {0}")]
    Namespace(String),
    #[error("ledger append error: {0}")]
    Append(String),
    #[error("ledger query error: {0}")]
    Query(String),
}

impl LedgerError {
    /// Whether a write that failed with this error may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(self, LedgerError::Query(_))
    }
}
