//! Ledger cell values, rows, and append field maps.

use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single ledger cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Text(String),
    Null,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Column type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Null => "null",
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Column name -> value for a structured append. Ordered so rendered column lists are stable.
pub type Fields = BTreeMap<String, Value>;

/// One materialized result row; values are in projection order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Integer at `idx`, or a query error naming the column position.
    pub fn integer(&self, idx: usize) -> Result<i64, LedgerError> {
        match self.values.get(idx) {
            Some(Value::Integer(n)) => Ok(*n),
            Some(other) => Err(LedgerError::Query(format!(
                "column {} expected integer, got {}",
                idx,
                other.type_name()
            ))),
            None => Err(LedgerError::Query(format!("column {} missing from row", idx))),
        }
    }

    /// Text at `idx`, or a query error naming the column position.
    pub fn text(&self, idx: usize) -> Result<&str, LedgerError> {
        match self.values.get(idx) {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => Err(LedgerError::Query(format!(
                "column {} expected text, got {}",
                idx,
                other.type_name()
            ))),
            None => Err(LedgerError::Query(format!("column {} missing from row", idx))),
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}
