//! SQLite-backed local ledger.
//!
//! Namespaces are rows in a catalog table that also holds the namespace's last `tx_id`, so ids are
//! strictly increasing across every table of a namespace. Each logical table lives in a physical
//! table named `<namespace>__<table>`, created on first append with triggers that abort any UPDATE
//! or DELETE.

use audit_types::{Fields, Ledger, LedgerError, LedgerQuery, Row, TxId, Value};
use async_trait::async_trait;
use rusqlite::types::{ToSql, ValueRef};
use std::path::Path;

const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_namespaces (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    last_tx_id INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(Default)]
struct Session {
    connected: bool,
    namespace: Option<String>,
}

/// SQLite-backed append-only ledger.
pub struct SqliteLedger {
    conn: std::sync::Mutex<rusqlite::Connection>,
    session: std::sync::RwLock<Session>,
}

impl SqliteLedger {
    /// Open (or create) a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(CATALOG_SCHEMA)
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            session: std::sync::RwLock::new(Session::default()),
        })
    }

    /// Register a namespace. Idempotent.
    pub fn create_namespace(&self, name: &str) -> Result<(), LedgerError> {
        if !audit_types::is_valid_identifier(name) || name.contains("__") {
            return Err(LedgerError::Namespace(format!("invalid namespace name: {:?}", name)));
        }
        let now = chrono::Utc::now().timestamp();
        self.with_conn(LedgerError::Namespace, |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO ledger_namespaces (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![name, now],
            )
        })?;
        Ok(())
    }

    fn with_conn<T, F>(&self, err: fn(String) -> LedgerError, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Connection(format!("failed to acquire lock: {}", e)))?;
        f(&conn).map_err(|e| err(e.to_string()))
    }

    fn active_namespace(&self) -> Result<String, LedgerError> {
        let session = self
            .session
            .read()
            .map_err(|e| LedgerError::Connection(format!("session lock poisoned: {}", e)))?;
        if !session.connected {
            return Err(LedgerError::Connection("not connected".to_string()));
        }
        session
            .namespace
            .clone()
            .ok_or_else(|| LedgerError::Namespace("no namespace selected".to_string()))
    }

    fn physical_table(namespace: &str, table: &str) -> String {
        format!("{}__{}", namespace, table)
    }

    /// Bumps the namespace sequence; must run inside the append transaction.
    fn next_tx_id(conn: &rusqlite::Connection, namespace: &str) -> Result<TxId, rusqlite::Error> {
        let updated = conn.execute(
            "UPDATE ledger_namespaces SET last_tx_id = last_tx_id + 1 WHERE name = ?1",
            [namespace],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        conn.query_row(
            "SELECT last_tx_id FROM ledger_namespaces WHERE name = ?1",
            [namespace],
            |row| row.get(0),
        )
    }

    fn table_exists(conn: &rusqlite::Connection, physical: &str) -> Result<bool, rusqlite::Error> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [physical],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_table(
        conn: &rusqlite::Connection,
        physical: &str,
        fields: &Fields,
    ) -> Result<(), rusqlite::Error> {
        let columns: Vec<String> = fields
            .iter()
            .map(|(name, value)| {
                let ty = match value {
                    Value::Integer(_) => "INTEGER",
                    Value::Text(_) | Value::Null => "TEXT",
                };
                format!("{} {}", name, ty)
            })
            .collect();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                tx_id INTEGER PRIMARY KEY,
                {cols}
            );
            CREATE TRIGGER IF NOT EXISTS {t}_no_update BEFORE UPDATE ON {t}
            BEGIN SELECT RAISE(ABORT, 'ledger rows are append-only'); END;
            CREATE TRIGGER IF NOT EXISTS {t}_no_delete BEFORE DELETE ON {t}
            BEGIN SELECT RAISE(ABORT, 'ledger rows are append-only'); END;
            "#,
            t = physical,
            cols = columns.join(",\n                "),
        ))
    }

    /// Raw statement access for tests that verify the storage-level append-only guard.
    #[cfg(test)]
    fn execute_raw(&self, sql: &str) -> Result<usize, LedgerError> {
        self.with_conn(LedgerError::Append, |conn| conn.execute(sql, []))
    }
}

fn to_sql_value(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Integer(n) => rusqlite::types::Value::Integer(*n),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Null => rusqlite::types::Value::Null,
    }
}

fn from_value_ref(idx: usize, v: ValueRef<'_>) -> Result<Value, rusqlite::Error> {
    match v {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(n) => Ok(Value::Integer(n)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(rusqlite::Error::Utf8Error),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            format!("column {}", idx),
            other.data_type(),
        )),
    }
}

fn named_params(params: &[(String, rusqlite::types::Value)]) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn connect(&self) -> Result<(), LedgerError> {
        self.with_conn(LedgerError::Connection, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        })?;
        let mut session = self
            .session
            .write()
            .map_err(|e| LedgerError::Connection(format!("session lock poisoned: {}", e)))?;
        session.connected = true;
        Ok(())
    }

    async fn select_namespace(&self, name: &str) -> Result<(), LedgerError> {
        let exists = self.with_conn(LedgerError::Namespace, |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM ledger_namespaces WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })?;
        if !exists {
            return Err(LedgerError::Namespace(format!("namespace not found: {}", name)));
        }
        let mut session = self
            .session
            .write()
            .map_err(|e| LedgerError::Connection(format!("session lock poisoned: {}", e)))?;
        if !session.connected {
            return Err(LedgerError::Connection("not connected".to_string()));
        }
        session.namespace = Some(name.to_string());
        Ok(())
    }

    async fn append(&self, table: &str, fields: &Fields) -> Result<TxId, LedgerError> {
        crate::validate_append(table, fields)?;
        let namespace = self.active_namespace()?;
        let physical = Self::physical_table(&namespace, table);
        let columns: Vec<&str> = std::iter::once("tx_id")
            .chain(fields.keys().map(String::as_str))
            .collect();
        let placeholders: Vec<String> = columns.iter().map(|c| format!("@{}", c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            physical,
            columns.join(", "),
            placeholders.join(", ")
        );

        self.with_conn(LedgerError::Append, |conn| {
            let tx = conn.unchecked_transaction()?;
            let tx_id = Self::next_tx_id(&tx, &namespace)?;
            if !Self::table_exists(&tx, &physical)? {
                Self::create_table(&tx, &physical, fields)?;
                tracing::debug!(table = %physical, "created append-only ledger table");
            }
            let params: Vec<(String, rusqlite::types::Value)> =
                std::iter::once(("@tx_id".to_string(), rusqlite::types::Value::Integer(tx_id)))
                    .chain(
                        fields
                            .iter()
                            .map(|(name, value)| (format!("@{}", name), to_sql_value(value))),
                    )
                    .collect();
            tx.execute(&sql, named_params(&params).as_slice())?;
            tx.commit()?;
            Ok(tx_id)
        })
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<Row>, LedgerError> {
        query.validate()?;
        let physical = Self::physical_table(&self.active_namespace()?, query.table());
        let sql = query.to_sql_for(&physical);
        let params: Vec<(String, rusqlite::types::Value)> = query
            .params()
            .iter()
            .map(|(name, value)| (format!("@{}", name), to_sql_value(value)))
            .collect();
        let width = query.columns().len();

        self.with_conn(LedgerError::Query, |conn| {
            if !Self::table_exists(conn, &physical)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(named_params(&params).as_slice(), |row| {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_value_ref(i, row.get_ref(i)?)?);
                }
                Ok(Row::new(values))
            })?;
            let out = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entity_id: i64, action: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("action".to_string(), Value::from(action));
        f.insert("entity".to_string(), Value::from("Comments"));
        f.insert("entity_id".to_string(), Value::Integer(entity_id));
        f.insert("payload".to_string(), Value::from("{}"));
        f
    }

    async fn ready() -> SqliteLedger {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.create_namespace("auditdb").unwrap();
        ledger.connect().await.unwrap();
        ledger.select_namespace("auditdb").await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn append_then_query_newest_first() {
        let ledger = ready().await;
        let a = ledger.append("audit", &fields(5, "ADD")).await.unwrap();
        let b = ledger.append("audit", &fields(5, "EDIT")).await.unwrap();
        let _ = ledger.append("audit", &fields(6, "ADD")).await.unwrap();
        assert!(b > a);

        let q = LedgerQuery::select("audit", &["tx_id", "action", "entity_id"])
            .where_eq("entity_id", 5)
            .newest_first();
        let rows = ledger.query(&q).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].integer(0).unwrap(), b);
        assert_eq!(rows[0].text(1).unwrap(), "EDIT");
        assert_eq!(rows[1].text(1).unwrap(), "ADD");
    }

    #[tokio::test]
    async fn rows_cannot_be_updated_or_deleted() {
        let ledger = ready().await;
        ledger.append("audit", &fields(1, "ADD")).await.unwrap();
        assert!(ledger
            .execute_raw("UPDATE auditdb__audit SET action = 'EDIT'")
            .is_err());
        assert!(ledger.execute_raw("DELETE FROM auditdb__audit").is_err());

        let rows = ledger
            .query(&LedgerQuery::select("audit", &["action"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(0).unwrap(), "ADD");
    }

    #[tokio::test]
    async fn unknown_namespace_is_rejected() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.connect().await.unwrap();
        let err = ledger.select_namespace("auditdb").await.unwrap_err();
        assert!(matches!(err, LedgerError::Namespace(_)));
    }

    #[tokio::test]
    async fn missing_table_reads_empty() {
        let ledger = ready().await;
        let rows = ledger
            .query(&LedgerQuery::select("audit", &["tx_id"]).newest_first())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn tx_ids_strictly_increase_across_tables() {
        let ledger = ready().await;
        let a = ledger.append("t1", &fields(1, "ADD")).await.unwrap();
        let b = ledger.append("t2", &fields(1, "ADD")).await.unwrap();
        let c = ledger.append("t1", &fields(1, "EDIT")).await.unwrap();
        assert_eq!((a, b, c), (1, 2, 3));

        let rows = ledger
            .query(&LedgerQuery::select("t1", &["tx_id"]).newest_first())
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.integer(0).unwrap()).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn namespaces_keep_separate_sequences() {
        let ledger = ready().await;
        ledger.create_namespace("otherdb").unwrap();
        ledger.append("audit", &fields(1, "ADD")).await.unwrap();
        ledger.append("audit", &fields(1, "EDIT")).await.unwrap();
        ledger.select_namespace("otherdb").await.unwrap();
        assert_eq!(ledger.append("audit", &fields(1, "ADD")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tx_ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let first = {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.create_namespace("auditdb").unwrap();
            ledger.connect().await.unwrap();
            ledger.select_namespace("auditdb").await.unwrap();
            ledger.append("audit", &fields(1, "ADD")).await.unwrap()
        };
        let ledger = SqliteLedger::open(&path).unwrap();
        ledger.connect().await.unwrap();
        ledger.select_namespace("auditdb").await.unwrap();
        let second = ledger.append("audit", &fields(1, "EDIT")).await.unwrap();
        assert!(second > first);
    }
}
