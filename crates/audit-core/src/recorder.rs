//! Audit recorder: encode a committed mutation and append it to the ledger.

use crate::{
    AttemptFailure, AuditConfig, AuditEncoder, AuditError, AuditWriteFailed, CommitStatus,
    MutationParams, RetryPolicy,
};
use audit_types::{AuditAction, Ledger, TxId};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Appends one audit record per call.
///
/// Encoding failures are returned immediately and write nothing. Ledger failures and per-attempt
/// timeouts are retried with bounded exponential backoff; exhaustion yields
/// [`AuditError::WriteFailed`] carrying the mutation. There is no deduplication: a caller that
/// retries `record` itself may produce duplicate records.
pub struct AuditRecorder {
    ledger: Arc<dyn Ledger>,
    encoder: AuditEncoder,
    table: String,
    append_timeout: Duration,
    retry: RetryPolicy,
}

impl AuditRecorder {
    pub fn new(ledger: Arc<dyn Ledger>, encoder: AuditEncoder, table: impl Into<String>) -> Self {
        Self {
            ledger,
            encoder,
            table: table.into(),
            append_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(ledger: Arc<dyn Ledger>, config: &AuditConfig) -> Self {
        Self::new(
            ledger,
            AuditEncoder::new(config.entity_registry()),
            config.ledger.audit_table.clone(),
        )
        .with_append_timeout(config.append_timeout)
        .with_retry(config.retry.clone())
    }

    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Record a mutation that has already committed in the primary store.
    pub async fn record<S>(
        &self,
        action: AuditAction,
        entity: &str,
        entity_id: i64,
        snapshot: &S,
    ) -> Result<TxId, AuditError>
    where
        S: Serialize + Sync + ?Sized,
    {
        self.record_with_cancel(action, entity, entity_id, snapshot, &CancellationToken::new())
            .await
    }

    /// Replay a mutation, e.g. one reported by an earlier [`AuditError::WriteFailed`].
    pub async fn record_mutation(&self, mutation: &MutationParams) -> Result<TxId, AuditError> {
        self.record(
            mutation.action,
            &mutation.entity,
            mutation.entity_id,
            &mutation.snapshot,
        )
        .await
    }

    /// Like [`record`](Self::record), aborting promptly when `cancel` fires.
    ///
    /// On cancellation the error reports whether the record is known committed, known not
    /// committed, or indeterminate. A timed-out attempt may still commit after it is abandoned, so
    /// once any attempt has timed out a later cancellation is indeterminate.
    pub async fn record_with_cancel<S>(
        &self,
        action: AuditAction,
        entity: &str,
        entity_id: i64,
        snapshot: &S,
        cancel: &CancellationToken,
    ) -> Result<TxId, AuditError>
    where
        S: Serialize + Sync + ?Sized,
    {
        let event = self.encoder.encode(action, entity, entity_id, snapshot)?;
        let fields = event.to_fields(Utc::now().timestamp());

        let mut attempt: u32 = 0;
        let mut maybe_committed = false;
        let cancelled = |maybe_committed: bool| {
            AuditError::WriteCancelled(if maybe_committed {
                CommitStatus::Indeterminate
            } else {
                CommitStatus::NotCommitted
            })
        };
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(maybe_committed));
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        entity = %event.entity,
                        entity_id = event.entity_id,
                        action = %event.action,
                        attempt,
                        "audit append abandoned in flight"
                    );
                    return Err(AuditError::WriteCancelled(CommitStatus::Indeterminate));
                }
                res = tokio::time::timeout(self.append_timeout, self.ledger.append(&self.table, &fields)) => res,
            };

            let failure = match outcome {
                Ok(Ok(tx_id)) => {
                    if cancel.is_cancelled() {
                        return Err(AuditError::WriteCancelled(CommitStatus::Committed { tx_id }));
                    }
                    tracing::debug!(
                        tx_id,
                        entity = %event.entity,
                        entity_id = event.entity_id,
                        action = %event.action,
                        attempt,
                        "audit record appended"
                    );
                    return Ok(tx_id);
                }
                Ok(Err(e)) => AttemptFailure::Ledger(e),
                Err(_) => {
                    maybe_committed = true;
                    AttemptFailure::TimedOut(self.append_timeout)
                }
            };

            let retryable = match failure {
                AttemptFailure::Ledger(ref e) => e.is_transient(),
                AttemptFailure::TimedOut(_) => true,
            };
            if !retryable || attempt >= self.retry.max_attempts {
                tracing::error!(
                    entity = %event.entity,
                    entity_id = event.entity_id,
                    action = %event.action,
                    attempts = attempt,
                    error = %failure,
                    "audit write failed; mutation is unaudited"
                );
                return Err(AuditError::WriteFailed(Box::new(AuditWriteFailed {
                    mutation: event.mutation(),
                    attempts: attempt,
                    last_error: failure,
                })));
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                entity = %event.entity,
                entity_id = event.entity_id,
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "audit append failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(cancelled(maybe_committed));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
