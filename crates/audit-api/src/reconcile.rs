//! Mutations that completed in the primary store but whose audit write failed.

use audit_core::{AuditWriteFailed, MutationParams};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Capacity used by [`ReconciliationQueue::new`].
pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

/// One unaudited mutation as reported by `/audit/unaudited`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingAudit {
    #[serde(flatten)]
    pub mutation: MutationParams,
    pub attempts: u32,
    pub last_error: String,
}

impl From<&AuditWriteFailed> for PendingAudit {
    fn from(f: &AuditWriteFailed) -> Self {
        Self {
            mutation: f.mutation.clone(),
            attempts: f.attempts,
            last_error: f.last_error.to_string(),
        }
    }
}

/// Bounded FIFO of failed audit writes, drained by reconciliation (process lifetime only).
///
/// Holds at most `capacity` entries. Pushing onto a full queue drops the oldest entry and logs it
/// at error level.
pub struct ReconciliationQueue {
    pending: Mutex<VecDeque<AuditWriteFailed>>,
    capacity: usize,
}

impl Default for ReconciliationQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PENDING_CAPACITY)
    }
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn push(&self, failed: AuditWriteFailed) {
        let mut pending = self.pending.lock().await;
        while pending.len() >= self.capacity {
            if let Some(dropped) = pending.pop_front() {
                let m = &dropped.mutation;
                tracing::error!(
                    entity = %m.entity,
                    entity_id = m.entity_id,
                    action = %m.action,
                    capacity = self.capacity,
                    "reconciliation queue full; dropping oldest unaudited mutation"
                );
            }
        }
        pending.push_back(failed);
    }

    pub async fn snapshot(&self) -> Vec<PendingAudit> {
        self.pending.lock().await.iter().map(PendingAudit::from).collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Takes every pending entry, oldest first; the caller re-pushes whatever it could not replay.
    pub async fn drain(&self) -> Vec<AuditWriteFailed> {
        self.pending.lock().await.drain(..).collect()
    }
}
