//! Comments gateway with a ledger-backed audit trail.

pub mod comments;
pub mod reconcile;
pub mod server;
