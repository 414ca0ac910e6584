//! Structured, parameterized ledger reads.
//!
//! A [`LedgerQuery`] renders to SQL with `@name` placeholders and a separate parameter map, so
//! values are always bound and never interpolated. Identifiers cannot be bound; they are
//! validated instead.

use crate::{Fields, LedgerError, Value};

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Ordering by the ledger transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrder {
    NewestFirst,
    OldestFirst,
}

/// `SELECT <columns> FROM <table> [WHERE c = @c AND ...] [ORDER BY tx_id ...] [LIMIT n]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerQuery {
    table: String,
    columns: Vec<String>,
    filters: Vec<(String, Value)>,
    order: Option<TxOrder>,
    limit: Option<u32>,
}

impl LedgerQuery {
    pub fn select(table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Equality filter. A second filter on the same column replaces the first.
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Some(existing) = self.filters.iter_mut().find(|(c, _)| c == column) {
            existing.1 = value;
        } else {
            self.filters.push((column.to_string(), value));
        }
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = Some(TxOrder::NewestFirst);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = Some(TxOrder::OldestFirst);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn order(&self) -> Option<TxOrder> {
        self.order
    }

    pub fn max_rows(&self) -> Option<u32> {
        self.limit
    }

    /// Rejects empty projections and any identifier that is not safe to render.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !is_valid_identifier(&self.table) {
            return Err(LedgerError::Query(format!(
                "invalid table name: {:?}",
                self.table
            )));
        }
        if self.columns.is_empty() {
            return Err(LedgerError::Query("empty projection".to_string()));
        }
        for col in self
            .columns
            .iter()
            .chain(self.filters.iter().map(|(c, _)| c))
        {
            if !is_valid_identifier(col) {
                return Err(LedgerError::Query(format!("invalid column name: {:?}", col)));
            }
        }
        Ok(())
    }

    /// Renders against the logical table name.
    pub fn to_sql(&self) -> String {
        self.to_sql_for(&self.table)
    }

    /// Renders against a physical table name chosen by the adapter (e.g. namespace-prefixed).
    pub fn to_sql_for(&self, table: &str) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), table);
        if !self.filters.is_empty() {
            let clauses: Vec<String> = self
                .filters
                .iter()
                .map(|(c, _)| format!("{} = @{}", c, c))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        match self.order {
            Some(TxOrder::NewestFirst) => sql.push_str(" ORDER BY tx_id DESC"),
            Some(TxOrder::OldestFirst) => sql.push_str(" ORDER BY tx_id ASC"),
            None => {}
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        sql
    }

    /// Bound parameters, keyed by placeholder name without the `@`.
    pub fn params(&self) -> Fields {
        self.filters.iter().cloned().collect()
    }
}
