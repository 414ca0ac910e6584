//! Read side: per-entity history and the global log, newest first.

use crate::{AuditConfig, AuditError};
use audit_types::{AuditRecord, Ledger, LedgerError, LedgerQuery, Row, AUDIT_COLUMNS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fail-fast queries over the audit table. Reads are never retried and a failed read is never
/// reported as an empty history.
pub struct AuditQueryService {
    ledger: Arc<dyn Ledger>,
    table: String,
    query_timeout: Duration,
}

impl AuditQueryService {
    pub fn new(ledger: Arc<dyn Ledger>, table: impl Into<String>) -> Self {
        Self {
            ledger,
            table: table.into(),
            query_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(ledger: Arc<dyn Ledger>, config: &AuditConfig) -> Self {
        Self::new(ledger, config.ledger.audit_table.clone()).with_query_timeout(config.query_timeout)
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Every record for one entity instance, newest first. Empty if it was never audited.
    pub async fn history_of(
        &self,
        entity: &str,
        entity_id: i64,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        self.history_of_with_cancel(entity, entity_id, &CancellationToken::new())
            .await
    }

    pub async fn history_of_with_cancel(
        &self,
        entity: &str,
        entity_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let query = LedgerQuery::select(&self.table, &AUDIT_COLUMNS)
            .where_eq("entity", entity)
            .where_eq("entity_id", entity_id)
            .newest_first();
        let records = self.run(&query, cancel).await?;
        tracing::debug!(entity, entity_id, count = records.len(), "audit history read");
        Ok(records)
    }

    /// The global log across all entities, newest first, optionally capped at `limit` rows.
    pub async fn all_records(&self, limit: Option<u32>) -> Result<Vec<AuditRecord>, AuditError> {
        self.all_records_with_cancel(limit, &CancellationToken::new())
            .await
    }

    pub async fn all_records_with_cancel(
        &self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut query = LedgerQuery::select(&self.table, &AUDIT_COLUMNS).newest_first();
        if let Some(n) = limit {
            query = query.limit(n);
        }
        let records = self.run(&query, cancel).await?;
        tracing::debug!(count = records.len(), ?limit, "audit log read");
        Ok(records)
    }

    /// Highest `entity_id` ever audited for `entity`, or `None` if there is none.
    ///
    /// Lets a primary store that restarts empty resume its id sequence without reusing ids that
    /// already have a history.
    pub async fn last_entity_id(&self, entity: &str) -> Result<Option<i64>, AuditError> {
        let query = LedgerQuery::select(&self.table, &["entity_id"]).where_eq("entity", entity);
        let rows = self.fetch(&query, &CancellationToken::new()).await?;
        let mut last = None;
        for row in &rows {
            let id = row.integer(0).map_err(AuditError::Query)?;
            last = last.max(Some(id));
        }
        Ok(last)
    }

    async fn run(
        &self,
        query: &LedgerQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = self.fetch(query, cancel).await?;
        let records = rows
            .into_iter()
            .map(AuditRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AuditError::Query)?;

        if let Some(w) = records.windows(2).find(|w| w[0].tx_id <= w[1].tx_id) {
            return Err(AuditError::Query(LedgerError::Query(format!(
                "ledger returned tx_ids out of order: {} before {}",
                w[0].tx_id, w[1].tx_id
            ))));
        }
        Ok(records)
    }

    async fn fetch(
        &self,
        query: &LedgerQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, AuditError> {
        if cancel.is_cancelled() {
            return Err(AuditError::QueryCancelled);
        }
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuditError::QueryCancelled),
            res = tokio::time::timeout(self.query_timeout, self.ledger.query(query)) => match res {
                Ok(rows) => rows.map_err(AuditError::Query)?,
                Err(_) => {
                    tracing::warn!(table = %self.table, timeout_ms = self.query_timeout.as_millis() as u64, "audit query timed out");
                    return Err(AuditError::QueryTimeout(self.query_timeout));
                }
            },
        };
        Ok(rows)
    }
}
