//! In-memory ledger with a monotonic transaction counter per namespace.

use audit_types::{Fields, Ledger, LedgerError, LedgerQuery, Row, TxId, TxOrder, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoredRow {
    tx_id: TxId,
    fields: Fields,
}

#[derive(Default)]
struct Namespace {
    last_tx_id: TxId,
    /// table -> rows in append order (ascending tx_id).
    tables: HashMap<String, Vec<StoredRow>>,
}

#[derive(Default)]
struct Session {
    connected: bool,
    namespace: Option<String>,
}

/// In-memory implementation of Ledger.
///
/// Storage is shared by every handle created with [`InMemoryLedger::handle`]; connection state and
/// the selected namespace are per handle. Rows can only be appended, never changed.
pub struct InMemoryLedger {
    /// namespace -> tables.
    namespaces: Arc<RwLock<HashMap<String, Namespace>>>,
    session: RwLock<Session>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_namespaces(&[])
    }

    /// Ledger with the given namespaces already created.
    pub fn with_namespaces(names: &[&str]) -> Self {
        let map = names
            .iter()
            .map(|n| (n.to_string(), Namespace::default()))
            .collect();
        Self {
            namespaces: Arc::new(RwLock::new(map)),
            session: RwLock::new(Session::default()),
        }
    }

    /// Creates `namespace`, connects and selects it.
    pub async fn connected_to(namespace: &str) -> Result<Self, LedgerError> {
        let ledger = Self::with_namespaces(&[namespace]);
        ledger.connect().await?;
        ledger.select_namespace(namespace).await?;
        Ok(ledger)
    }

    /// New handle over the same storage, with its own (disconnected) session.
    pub fn handle(&self) -> Self {
        Self {
            namespaces: Arc::clone(&self.namespaces),
            session: RwLock::new(Session::default()),
        }
    }

    pub async fn create_namespace(&self, name: &str) -> Result<(), LedgerError> {
        if !audit_types::is_valid_identifier(name) {
            return Err(LedgerError::Namespace(format!("invalid namespace name: {:?}", name)));
        }
        self.namespaces
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    /// Number of rows in `table` of the selected namespace (0 if the table does not exist).
    pub async fn row_count(&self, table: &str) -> Result<usize, LedgerError> {
        let ns = self.active_namespace().await?;
        let guard = self.namespaces.read().await;
        Ok(guard
            .get(&ns)
            .and_then(|n| n.tables.get(table))
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn active_namespace(&self) -> Result<String, LedgerError> {
        let session = self.session.read().await;
        if !session.connected {
            return Err(LedgerError::Connection("not connected".to_string()));
        }
        session
            .namespace
            .clone()
            .ok_or_else(|| LedgerError::Namespace("no namespace selected".to_string()))
    }

    fn cell(row: &StoredRow, column: &str) -> Option<Value> {
        if column == "tx_id" {
            return Some(Value::Integer(row.tx_id));
        }
        row.fields.get(column).cloned()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn connect(&self) -> Result<(), LedgerError> {
        self.session.write().await.connected = true;
        Ok(())
    }

    async fn select_namespace(&self, name: &str) -> Result<(), LedgerError> {
        if !self.namespaces.read().await.contains_key(name) {
            return Err(LedgerError::Namespace(format!("namespace not found: {}", name)));
        }
        let mut session = self.session.write().await;
        if !session.connected {
            return Err(LedgerError::Connection("not connected".to_string()));
        }
        session.namespace = Some(name.to_string());
        Ok(())
    }

    async fn append(&self, table: &str, fields: &Fields) -> Result<TxId, LedgerError> {
        crate::validate_append(table, fields)?;
        let ns_name = self.active_namespace().await?;
        let mut guard = self.namespaces.write().await;
        let ns = guard
            .get_mut(&ns_name)
            .ok_or_else(|| LedgerError::Namespace(format!("namespace not found: {}", ns_name)))?;
        ns.last_tx_id += 1;
        let tx_id = ns.last_tx_id;
        ns.tables
            .entry(table.to_string())
            .or_default()
            .push(StoredRow {
                tx_id,
                fields: fields.clone(),
            });
        Ok(tx_id)
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<Row>, LedgerError> {
        query.validate()?;
        let ns_name = self.active_namespace().await?;
        let guard = self.namespaces.read().await;
        let ns = guard
            .get(&ns_name)
            .ok_or_else(|| LedgerError::Namespace(format!("namespace not found: {}", ns_name)))?;
        let rows = match ns.tables.get(query.table()) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let mut matched: Vec<&StoredRow> = rows
            .iter()
            .filter(|r| {
                query
                    .filters()
                    .iter()
                    .all(|(col, want)| Self::cell(r, col).as_ref() == Some(want))
            })
            .collect();
        if query.order() == Some(TxOrder::NewestFirst) {
            matched.reverse();
        }
        if let Some(n) = query.max_rows() {
            matched.truncate(n as usize);
        }

        let mut out = Vec::with_capacity(matched.len());
        for r in matched {
            let mut values = Vec::with_capacity(query.columns().len());
            for col in query.columns() {
                let v = Self::cell(r, col)
                    .ok_or_else(|| LedgerError::Query(format!("unknown column: {}", col)))?;
                values.push(v);
            }
            out.push(Row::new(values));
        }
        Ok(out)
    }
}
