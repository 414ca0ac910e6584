//! Mutation -> ledger record shape. Pure and deterministic.

use crate::{AuditError, EntityRegistry, MutationParams};
use audit_types::{AuditAction, Fields, Value};
use serde::Serialize;

/// Serializes a JSON value with object keys sorted at every level and no whitespace.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Audit record fields minus the ledger-assigned `tx_id` and the append-time `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    pub payload: String,
    /// Structured form of `payload`, carried for failure reports.
    pub snapshot: serde_json::Value,
}

impl EncodedEvent {
    /// Append fields for the audit table.
    pub fn to_fields(&self, created_at: i64) -> Fields {
        let mut f = Fields::new();
        f.insert("action".to_string(), Value::from(self.action.as_str()));
        f.insert("entity".to_string(), Value::from(self.entity.as_str()));
        f.insert("entity_id".to_string(), Value::Integer(self.entity_id));
        f.insert("payload".to_string(), Value::from(self.payload.as_str()));
        f.insert("created_at".to_string(), Value::Integer(created_at));
        f
    }

    pub fn mutation(&self) -> MutationParams {
        MutationParams {
            action: self.action,
            entity: self.entity.clone(),
            entity_id: self.entity_id,
            snapshot: self.snapshot.clone(),
        }
    }
}

/// Encodes mutations for entities in the registry; anything else fails closed.
#[derive(Debug, Clone)]
pub struct AuditEncoder {
    registry: EntityRegistry,
}

impl AuditEncoder {
    pub fn new(registry: EntityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn encode<S: Serialize + ?Sized>(
        &self,
        action: AuditAction,
        entity: &str,
        entity_id: i64,
        snapshot: &S,
    ) -> Result<EncodedEvent, AuditError> {
        if entity.is_empty() || !self.registry.contains(entity) {
            return Err(AuditError::UnknownEntity(entity.to_string()));
        }
        let snapshot =
            serde_json::to_value(snapshot).map_err(|e| AuditError::Encode(e.to_string()))?;
        Ok(EncodedEvent {
            action,
            entity: entity.to_string(),
            entity_id,
            payload: canonical_json(&snapshot),
            snapshot,
        })
    }
}

impl Default for AuditEncoder {
    fn default() -> Self {
        Self::new(EntityRegistry::assessment_domain())
    }
}
