//! Audit record and action types.

use crate::{LedgerError, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ledger-assigned transaction id. Sole ordering key for audit records.
pub type TxId = i64;

/// Column projection for audit record reads, in destructuring order.
pub const AUDIT_COLUMNS: [&str; 6] = [
    "tx_id",
    "action",
    "entity",
    "entity_id",
    "payload",
    "created_at",
];

/// Kind of mutation being audited. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Add,
    Edit,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Add => "ADD",
            AuditAction::Edit => "EDIT",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown audit action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for AuditAction {
    type Err = UnknownAction;

    /// Case-sensitive: only the persisted upper-case spellings are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(AuditAction::Add),
            "EDIT" => Ok(AuditAction::Edit),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// One immutable ledger entry describing a single mutation of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tx_id: TxId,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    /// Canonical JSON snapshot of the entity after the mutation.
    pub payload: String,
    /// Epoch seconds, stamped by the recorder at append time.
    pub created_at: i64,
}

impl TryFrom<Row> for AuditRecord {
    type Error = LedgerError;

    /// Destructures a row projected as [`AUDIT_COLUMNS`].
    fn try_from(row: Row) -> Result<Self, Self::Error> {
        if row.len() != AUDIT_COLUMNS.len() {
            return Err(LedgerError::Query(format!(
                "audit row has {} columns, expected {}",
                row.len(),
                AUDIT_COLUMNS.len()
            )));
        }
        let action = row
            .text(1)?
            .parse::<AuditAction>()
            .map_err(|e| LedgerError::Query(e.to_string()))?;
        Ok(AuditRecord {
            tx_id: row.integer(0)?,
            action,
            entity: row.text(2)?.to_string(),
            entity_id: row.integer(3)?,
            payload: row.text(4)?.to_string(),
            created_at: row.integer(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn row(action: &str) -> Row {
        Row::new(vec![
            Value::Integer(7),
            Value::from(action),
            Value::from("Comments"),
            Value::Integer(3),
            Value::from("{}"),
            Value::Integer(1_769_428_800),
        ])
    }

    #[test]
    fn row_destructures_positionally() {
        let rec = AuditRecord::try_from(row("EDIT")).unwrap();
        assert_eq!(rec.tx_id, 7);
        assert_eq!(rec.action, AuditAction::Edit);
        assert_eq!(rec.entity, "Comments");
        assert_eq!(rec.entity_id, 3);
        assert_eq!(rec.payload, "{}");
    }

    #[test]
    fn lowercase_action_is_rejected() {
        let err = AuditRecord::try_from(row("add")).unwrap_err();
        assert!(matches!(err, LedgerError::Query(_)));
    }

    #[test]
    fn short_row_is_rejected() {
        let mut r = row("ADD");
        r.values.pop();
        assert!(AuditRecord::try_from(r).is_err());
    }

    #[test]
    fn action_serializes_upper_case() {
        let s = serde_json::to_string(&AuditAction::Delete).unwrap();
        assert_eq!(s, "\"DELETE\"");
    }
}
