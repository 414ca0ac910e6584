//! Ledger adapters: in-memory fake, SQLite-backed local ledger, and an HTTP SQL-gateway client.

#[cfg(feature = "test-util")]
pub mod faulty;
#[cfg(feature = "http")]
mod http;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use audit_types::{Fields, Ledger, LedgerError, LedgerQuery, Row, TxId, Value};
#[cfg(feature = "test-util")]
pub use faulty::{Fault, FaultyLedger};
#[cfg(feature = "http")]
pub use http::{HttpLedgerClient, LedgerCredentials, LedgerEndpoint};
pub use memory::InMemoryLedger;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedger;

/// Checks an append: valid table and column names, at least one field, no caller-supplied `tx_id`.
pub(crate) fn validate_append(table: &str, fields: &Fields) -> Result<(), LedgerError> {
    if !audit_types::is_valid_identifier(table) {
        return Err(LedgerError::Append(format!("invalid table name: {:?}", table)));
    }
    if fields.is_empty() {
        return Err(LedgerError::Append("append with no fields".to_string()));
    }
    for name in fields.keys() {
        if !audit_types::is_valid_identifier(name) {
            return Err(LedgerError::Append(format!("invalid column name: {:?}", name)));
        }
        if name == "tx_id" {
            return Err(LedgerError::Append(
                "tx_id is assigned by the ledger".to_string(),
            ));
        }
    }
    Ok(())
}
