//! HTTP ledger client against a mock SQL gateway.
#![cfg(feature = "http")]

use audit_ledger::{Fields, HttpLedgerClient, Ledger, LedgerCredentials, LedgerError, LedgerQuery, Value};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials() -> LedgerCredentials {
    LedgerCredentials {
        username: "immudb".to_string(),
        password: "immudb".to_string(),
    }
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login"))
        // base64("immudb")
        .and(body_partial_json(json!({ "user": "aW1tdWRi", "password": "aW1tdWRi" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "login-token" })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/db/use/auditdb"))
        .and(header("authorization", "Bearer login-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "db-token" })))
        .mount(server)
        .await;
}

async fn ready_client(server: &MockServer) -> HttpLedgerClient {
    mount_session(server).await;
    let client = HttpLedgerClient::with_base_url(server.uri(), credentials());
    client.connect().await.unwrap();
    client.select_namespace("auditdb").await.unwrap();
    client
}

#[tokio::test]
async fn append_binds_params_and_returns_primary_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/sqlexec"))
        .and(header("authorization", "Bearer db-token"))
        .and(body_partial_json(json!({
            "sql": "INSERT INTO comments_audit_v2 (action, entity_id) VALUES (@action, @entity_id)",
            "params": [
                { "name": "action", "value": { "s": "ADD" } },
                { "name": "entity_id", "value": { "n": "12" } }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "txs": [{
                "header": { "id": "981" },
                "lastInsertedPKs": { "comments_audit_v2": { "n": "57" } }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ready_client(&server).await;
    let mut fields = Fields::new();
    fields.insert("action".to_string(), Value::from("ADD"));
    fields.insert("entity_id".to_string(), Value::Integer(12));
    let tx_id = client.append("comments_audit_v2", &fields).await.unwrap();
    assert_eq!(tx_id, 57);
}

#[tokio::test]
async fn ensure_table_creates_audit_shape_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/sqlexec"))
        .and(header("authorization", "Bearer db-token"))
        .and(body_partial_json(json!({
            "sql": "CREATE TABLE IF NOT EXISTS comments_audit_v2 (tx_id INTEGER AUTO_INCREMENT, \
                    action VARCHAR, entity VARCHAR, entity_id INTEGER, payload VARCHAR, \
                    created_at INTEGER, PRIMARY KEY tx_id)",
            "params": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "txs": [] })))
        .expect(2)
        .mount(&server)
        .await;

    let client = ready_client(&server).await;
    client.ensure_table("comments_audit_v2").await.unwrap();
    client.ensure_table("comments_audit_v2").await.unwrap();
}

#[tokio::test]
async fn ensure_table_rejects_unsafe_name_locally() {
    let server = MockServer::start().await;
    let client = ready_client(&server).await;
    let err = client.ensure_table("audit; DROP").await.unwrap_err();
    assert!(matches!(err, LedgerError::Append(_)));
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/db/sqlexec"));
}

#[tokio::test]
async fn query_decodes_rows_in_projection_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/sqlquery"))
        .and(body_partial_json(json!({
            "sql": "SELECT tx_id, action FROM comments_audit_v2 WHERE entity_id = @entity_id ORDER BY tx_id DESC",
            "params": [{ "name": "entity_id", "value": { "n": "3" } }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "columns": [{ "name": "tx_id" }, { "name": "action" }],
            "rows": [
                { "values": [{ "n": "9" }, { "s": "EDIT" }] },
                { "values": [{ "n": "4" }, { "s": "ADD" }] }
            ]
        })))
        .mount(&server)
        .await;

    let client = ready_client(&server).await;
    let q = LedgerQuery::select("comments_audit_v2", &["tx_id", "action"])
        .where_eq("entity_id", 3)
        .newest_first();
    let rows = client.query(&q).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].integer(0).unwrap(), 9);
    assert_eq!(rows[0].text(1).unwrap(), "EDIT");
    assert_eq!(rows[1].text(1).unwrap(), "ADD");
}

#[tokio::test]
async fn gateway_error_on_query_is_query_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/sqlquery"))
        .respond_with(ResponseTemplate::new(500).set_body_string("table does not exist"))
        .mount(&server)
        .await;

    let client = ready_client(&server).await;
    let err = client
        .query(&LedgerQuery::select("missing", &["tx_id"]))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Query(_)));
}

#[tokio::test]
async fn unknown_database_is_namespace_error() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("GET"))
        .and(path("/db/use/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_string("database does not exist"))
        .mount(&server)
        .await;

    let client = HttpLedgerClient::with_base_url(server.uri(), credentials());
    client.connect().await.unwrap();
    let err = client.select_namespace("nope").await.unwrap_err();
    assert!(matches!(err, LedgerError::Namespace(_)));
}

#[tokio::test]
async fn rejected_login_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid user name or password"))
        .mount(&server)
        .await;

    let client = HttpLedgerClient::with_base_url(server.uri(), credentials());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, LedgerError::Connection(_)));
}

#[tokio::test]
async fn expired_session_reconnects_on_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/sqlexec"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/db/sqlexec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "txs": [{ "header": { "id": 77 } }]
        })))
        .mount(&server)
        .await;

    let client = ready_client(&server).await;
    let mut fields = Fields::new();
    fields.insert("action".to_string(), Value::from("EDIT"));

    let err = client.append("audit", &fields).await.unwrap_err();
    assert!(matches!(err, LedgerError::Connection(_)));

    let tx_id = client.append("audit", &fields).await.unwrap();
    assert_eq!(tx_id, 77);
}

#[tokio::test]
async fn unreachable_gateway_is_connection_error() {
    let client = HttpLedgerClient::with_base_url("http://127.0.0.1:9", credentials());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, LedgerError::Connection(_)));
}

#[tokio::test]
async fn append_without_namespace_is_rejected_locally() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    let client = HttpLedgerClient::with_base_url(server.uri(), credentials());
    client.connect().await.unwrap();
    let mut fields = Fields::new();
    fields.insert("action".to_string(), Value::from("ADD"));
    let err = client.append("audit", &fields).await.unwrap_err();
    assert!(matches!(err, LedgerError::Namespace(_)));
}
