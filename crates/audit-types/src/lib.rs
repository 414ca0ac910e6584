//! Core types and the ledger trait for the audit trail.
//!
//! Record shapes mirror the audit table persisted in the ledger:
//! `tx_id, action, entity, entity_id, payload, created_at`.

mod query;
mod record;
mod traits;
mod value;

pub use query::*;
pub use record::*;
pub use traits::*;
pub use value::*;
