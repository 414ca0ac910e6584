//! Audit trail core: entity taxonomy, event encoding, recording with retry, and history queries.
//!
//! The recorder and query service hold no audit state of their own; ordering and durability
//! belong to the ledger behind [`audit_types::Ledger`].

mod config;
mod encoder;
mod entity;
mod error;
mod lineage;
mod query;
mod recorder;

pub use audit_types::{AuditAction, AuditRecord, Ledger, LedgerError, TxId};
pub use config::{AuditConfig, ConfigError, LedgerBackend, LedgerSettings, RetryPolicy};
pub use encoder::{canonical_json, AuditEncoder, EncodedEvent};
pub use entity::EntityRegistry;
pub use error::{AttemptFailure, AuditError, AuditWriteFailed, CommitStatus, MutationParams};
pub use lineage::{check_lineage, LineageViolation};
pub use query::AuditQueryService;
pub use recorder::AuditRecorder;
pub use tokio_util::sync::CancellationToken;
