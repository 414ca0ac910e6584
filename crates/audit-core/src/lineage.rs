//! Consistency check over one entity instance's history.

use audit_types::{AuditAction, AuditRecord, TxId};
use serde::Serialize;
use std::collections::HashSet;

/// A property that a well-formed ADD/EDIT/DELETE history violates.
///
/// Histories written while audit writes were failing can legitimately show these; the check
/// reports rather than repairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineageViolation {
    /// The oldest record is not an ADD.
    MissingAdd { first_tx_id: TxId },
    /// An ADD while the object is already live.
    DuplicateAdd { tx_id: TxId },
    /// The same tx_id appears twice.
    DuplicateTxId { tx_id: TxId },
    /// Records for more than one (entity, entity_id) pair were passed in.
    MixedEntities { tx_id: TxId },
    /// An EDIT or DELETE recorded after a DELETE, with no ADD in between.
    ActivityAfterDelete { delete_tx_id: TxId, tx_id: TxId },
}

/// Checks a history in any order. An empty history has no violations.
pub fn check_lineage(history: &[AuditRecord]) -> Vec<LineageViolation> {
    let mut violations = Vec::new();
    let mut ordered: Vec<&AuditRecord> = history.iter().collect();
    ordered.sort_by_key(|r| r.tx_id);

    let Some(first) = ordered.first() else {
        return violations;
    };

    let mut seen = HashSet::new();
    for r in &ordered {
        if !seen.insert(r.tx_id) {
            violations.push(LineageViolation::DuplicateTxId { tx_id: r.tx_id });
        }
        if r.entity != first.entity || r.entity_id != first.entity_id {
            violations.push(LineageViolation::MixedEntities { tx_id: r.tx_id });
        }
    }

    // A history that does not open with ADD is treated as live from its first record.
    let mut live = first.action != AuditAction::Add;
    if live {
        violations.push(LineageViolation::MissingAdd {
            first_tx_id: first.tx_id,
        });
    }

    let mut deleted_at: Option<TxId> = None;
    for r in &ordered {
        match (r.action, deleted_at) {
            (AuditAction::Add, _) if live => {
                violations.push(LineageViolation::DuplicateAdd { tx_id: r.tx_id });
            }
            (AuditAction::Add, _) => {
                live = true;
                deleted_at = None;
            }
            (_, Some(delete_tx_id)) => {
                violations.push(LineageViolation::ActivityAfterDelete {
                    delete_tx_id,
                    tx_id: r.tx_id,
                });
            }
            (AuditAction::Delete, None) => {
                live = false;
                deleted_at = Some(r.tx_id);
            }
            (AuditAction::Edit, None) => {}
        }
    }

    violations
}
