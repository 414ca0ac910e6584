//! HTTP client for an immudb-style SQL gateway.
//!
//! Endpoints: `POST /login`, `GET /db/use/{database}`, `POST /db/sqlexec`, `POST /db/sqlquery`.
//! SQL values travel as typed objects: `{"n": "5"}` for integers (int64 as string), `{"s": "..."}`
//! for text, `{"null": null}` for NULL.

use audit_types::{Fields, Ledger, LedgerError, LedgerQuery, Row, TxId, Value};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Where the ledger gateway listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl LedgerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Clone)]
pub struct LedgerCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LedgerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(default)]
    txs: Vec<CommittedTx>,
}

#[derive(Debug, Deserialize)]
struct CommittedTx {
    #[serde(default)]
    header: Option<TxHeader>,
    #[serde(default, rename = "lastInsertedPKs")]
    last_inserted_pks: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TxHeader {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    values: Vec<serde_json::Value>,
}

#[derive(Default)]
struct Session {
    /// Login token; cleared when the gateway rejects it.
    token: Option<String>,
    /// Last selected namespace, re-selected after a reconnect.
    namespace: Option<String>,
    /// Token bound to `namespace`.
    db_token: Option<String>,
}

/// Ledger adapter over HTTP. Sessions are re-established lazily after expiry or connection loss.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    credentials: LedgerCredentials,
    session: RwLock<Session>,
}

impl HttpLedgerClient {
    pub fn new(endpoint: &LedgerEndpoint, credentials: LedgerCredentials) -> Self {
        Self::with_base_url(endpoint.base_url(), credentials)
    }

    pub fn with_base_url(base_url: impl Into<String>, credentials: LedgerCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(Session::default()),
        }
    }

    async fn login(&self) -> Result<String, LedgerError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let body = serde_json::json!({
            "user": b64.encode(self.credentials.username.as_bytes()),
            "password": b64.encode(self.credentials.password.as_bytes()),
        });
        let res = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(LedgerError::Connection(format!(
                "login rejected {}: {}",
                status, text
            )));
        }
        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| LedgerError::Connection(e.to_string()))?;
        Ok(parsed.token)
    }

    async fn use_database(&self, token: &str, name: &str) -> Result<String, LedgerError> {
        let res = self
            .client
            .get(format!("{}/db/use/{}", self.base_url, name))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LedgerError::Connection(format!("session rejected: {}", text)));
        }
        if !status.is_success() {
            return Err(LedgerError::Namespace(format!(
                "cannot use database {} ({}): {}",
                name, status, text
            )));
        }
        let parsed: TokenResponse =
            serde_json::from_str(&text).map_err(|e| LedgerError::Namespace(e.to_string()))?;
        Ok(parsed.token)
    }

    /// Token for the selected namespace, reconnecting first if the session was dropped.
    async fn active_token(&self) -> Result<String, LedgerError> {
        {
            let session = self.session.read().await;
            if let Some(ref t) = session.db_token {
                return Ok(t.clone());
            }
            if session.namespace.is_none() {
                return Err(LedgerError::Namespace("no namespace selected".to_string()));
            }
        }
        self.connect().await?;
        self.session
            .read()
            .await
            .db_token
            .clone()
            .ok_or_else(|| LedgerError::Namespace("no namespace selected".to_string()))
    }

    /// Creates the audit table if the gateway does not have it yet. `tx_id` is the ledger-assigned
    /// primary key.
    pub async fn ensure_table(&self, table: &str) -> Result<(), LedgerError> {
        if !audit_types::is_valid_identifier(table) {
            return Err(LedgerError::Append(format!("invalid table name: {:?}", table)));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (tx_id INTEGER AUTO_INCREMENT, action VARCHAR, \
             entity VARCHAR, entity_id INTEGER, payload VARCHAR, created_at INTEGER, \
             PRIMARY KEY tx_id)",
            table
        );
        self.post_sql("/db/sqlexec", &sql, &Fields::new(), LedgerError::Append)
            .await?;
        tracing::info!(table, "audit table ready");
        Ok(())
    }

    async fn expire_session(&self) {
        let mut session = self.session.write().await;
        session.token = None;
        session.db_token = None;
    }

    /// POST a SQL statement; `err` classifies non-auth failures for the calling operation.
    async fn post_sql(
        &self,
        path: &str,
        sql: &str,
        params: &Fields,
        err: fn(String) -> LedgerError,
    ) -> Result<String, LedgerError> {
        let token = self.active_token().await?;
        let body = serde_json::json!({
            "sql": sql,
            "params": params
                .iter()
                .map(|(name, value)| serde_json::json!({ "name": name, "value": to_sql_value(value) }))
                .collect::<Vec<_>>(),
        });
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    LedgerError::Connection(e.to_string())
                } else {
                    err(e.to_string())
                }
            })?;
        let status = res.status();
        let text = res.text().await.map_err(|e| err(e.to_string()))?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!(path, "ledger session expired");
            self.expire_session().await;
            return Err(LedgerError::Connection(format!("session expired: {}", text)));
        }
        if !status.is_success() {
            return Err(err(format!("gateway error {}: {}", status, text)));
        }
        Ok(text)
    }
}

fn to_sql_value(v: &Value) -> serde_json::Value {
    match v {
        Value::Integer(n) => serde_json::json!({ "n": n.to_string() }),
        Value::Text(s) => serde_json::json!({ "s": s }),
        Value::Null => serde_json::json!({ "null": null }),
    }
}

fn parse_int(v: &serde_json::Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
}

fn from_sql_value(v: &serde_json::Value) -> Result<Value, LedgerError> {
    if let Some(n) = v.get("n") {
        return parse_int(n)
            .map(Value::Integer)
            .ok_or_else(|| LedgerError::Query(format!("bad integer value: {}", n)));
    }
    if let Some(s) = v.get("s").and_then(|s| s.as_str()) {
        return Ok(Value::Text(s.to_string()));
    }
    if v.get("null").is_some() {
        return Ok(Value::Null);
    }
    Err(LedgerError::Query(format!("unsupported sql value: {}", v)))
}

#[async_trait::async_trait]
impl Ledger for HttpLedgerClient {
    async fn connect(&self) -> Result<(), LedgerError> {
        let token = self.login().await?;
        let namespace = self.session.read().await.namespace.clone();
        let db_token = match namespace {
            Some(ref ns) => Some(self.use_database(&token, ns).await?),
            None => None,
        };
        let mut session = self.session.write().await;
        session.token = Some(token);
        session.db_token = db_token;
        tracing::debug!(base_url = %self.base_url, "ledger session established");
        Ok(())
    }

    async fn select_namespace(&self, name: &str) -> Result<(), LedgerError> {
        let token = match self.session.read().await.token.clone() {
            Some(t) => t,
            None => return Err(LedgerError::Connection("not connected".to_string())),
        };
        let db_token = self.use_database(&token, name).await?;
        let mut session = self.session.write().await;
        session.namespace = Some(name.to_string());
        session.db_token = Some(db_token);
        Ok(())
    }

    async fn append(&self, table: &str, fields: &Fields) -> Result<TxId, LedgerError> {
        crate::validate_append(table, fields)?;
        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = columns.iter().map(|c| format!("@{}", c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let text = self
            .post_sql("/db/sqlexec", &sql, fields, LedgerError::Append)
            .await?;
        let parsed: ExecResponse =
            serde_json::from_str(&text).map_err(|e| LedgerError::Append(e.to_string()))?;
        let tx = parsed
            .txs
            .first()
            .ok_or_else(|| LedgerError::Append("gateway returned no transaction".to_string()))?;
        tx.last_inserted_pks
            .get(table)
            .and_then(|pk| pk.get("n"))
            .and_then(parse_int)
            .or_else(|| {
                tx.header
                    .as_ref()
                    .and_then(|h| h.id.as_ref())
                    .and_then(parse_int)
            })
            .ok_or_else(|| LedgerError::Append("gateway returned no transaction id".to_string()))
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<Row>, LedgerError> {
        query.validate()?;
        let text = self
            .post_sql("/db/sqlquery", &query.to_sql(), &query.params(), LedgerError::Query)
            .await?;
        let parsed: QueryResponse =
            serde_json::from_str(&text).map_err(|e| LedgerError::Query(e.to_string()))?;
        let width = query.columns().len();
        parsed
            .rows
            .iter()
            .map(|r| {
                if r.values.len() != width {
                    return Err(LedgerError::Query(format!(
                        "row has {} values, projection has {}",
                        r.values.len(),
                        width
                    )));
                }
                r.values
                    .iter()
                    .map(from_sql_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Row::new)
            })
            .collect()
    }
}
