//! Axum server and routes: the Comments gateway and the audit read side.

use crate::comments::{Comment, CommentInput, InMemoryCommentStore, COMMENTS_ENTITY};
use crate::reconcile::{PendingAudit, ReconciliationQueue};
use audit_core::{
    check_lineage, AuditAction, AuditConfig, AuditError, AuditQueryService, AuditRecord,
    AuditRecorder, CommitStatus, LedgerBackend, LineageViolation, TxId,
};
use audit_ledger::{
    HttpLedgerClient, InMemoryLedger, Ledger, LedgerCredentials, LedgerEndpoint, LedgerError,
    SqliteLedger,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub comments: InMemoryCommentStore,
    pub recorder: AuditRecorder,
    pub queries: AuditQueryService,
    pub pending: ReconciliationQueue,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, config: &AuditConfig) -> Self {
        Self {
            comments: InMemoryCommentStore::new(),
            recorder: AuditRecorder::from_config(Arc::clone(&ledger), config),
            queries: AuditQueryService::from_config(ledger, config),
            pending: ReconciliationQueue::with_capacity(config.pending_capacity),
        }
    }

    /// Like [`AppState::new`], but comment ids resume after the highest id the ledger has seen,
    /// so a restarted primary store never hands out an id that already has a history.
    pub async fn resume(ledger: Arc<dyn Ledger>, config: &AuditConfig) -> Result<Self, AuditError> {
        let mut state = Self::new(ledger, config);
        let last_id = state.queries.last_entity_id(COMMENTS_ENTITY).await?;
        if let Some(last_id) = last_id {
            tracing::info!(last_id, "resuming comment ids after audited history");
            state.comments = InMemoryCommentStore::starting_after(last_id);
        }
        Ok(state)
    }
}

/// Builds the configured ledger adapter, connects, and selects the audit namespace. The HTTP
/// backend also provisions the audit table.
pub async fn connect_ledger(config: &AuditConfig) -> Result<Arc<dyn Ledger>, LedgerError> {
    let namespace = config.ledger.database.as_str();
    let mut gateway = None;
    let ledger: Arc<dyn Ledger> = match config.backend {
        LedgerBackend::Memory => Arc::new(InMemoryLedger::with_namespaces(&[namespace])),
        LedgerBackend::Sqlite => {
            let ledger = SqliteLedger::open(&config.sqlite_path)?;
            ledger.create_namespace(namespace)?;
            Arc::new(ledger)
        }
        LedgerBackend::Http => {
            let client = Arc::new(HttpLedgerClient::new(
                &LedgerEndpoint::new(config.ledger.host.clone(), config.ledger.port),
                LedgerCredentials {
                    username: config.ledger.username.clone(),
                    password: config.ledger.password.clone(),
                },
            ));
            gateway = Some(Arc::clone(&client));
            client
        }
    };
    ledger.connect().await?;
    ledger.select_namespace(namespace).await?;
    if let Some(client) = gateway {
        client.ensure_table(&config.ledger.audit_table).await?;
    }
    tracing::info!(backend = ?config.backend, namespace, table = %config.ledger.audit_table, "ledger ready");
    Ok(ledger)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/comments/", get(handle_list_comments).post(handle_create_comment))
        .route(
            "/comments/:id/",
            get(handle_get_comment)
                .put(handle_update_comment)
                .delete(handle_delete_comment),
        )
        .route("/audit/logs", get(handle_audit_logs))
        .route("/audit/unaudited", get(handle_unaudited))
        .route("/audit/reconcile", post(handle_reconcile))
        .route("/audit/:entity/:entity_id", get(handle_audit_history))
        .route("/audit/:entity/:entity_id/lineage", get(handle_audit_lineage))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        })
    }

    fn err(code: i32, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code,
            message: message.into(),
            data: None,
        })
    }
}

/// Envelope for create/update/delete. `audit_tx_id` is null when the audit write failed.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Comment>,
    pub audit_tx_id: Option<TxId>,
}

impl MutationResponse {
    fn not_found(id: i64) -> Json<Self> {
        Json(Self {
            code: 404,
            message: format!("Comment {} not found", id),
            data: None,
            audit_tx_id: None,
        })
    }
}

/// Records the audit event for a committed mutation and builds the response.
///
/// A failed audit write never undoes the mutation: it is logged and queued for reconciliation and
/// the response carries `audit_tx_id: null`.
async fn audited(
    state: &AppState,
    action: AuditAction,
    comment: Comment,
) -> Json<MutationResponse> {
    let res = state
        .recorder
        .record(action, COMMENTS_ENTITY, comment.id, &comment)
        .await;
    match res {
        Ok(tx_id) => Json(MutationResponse {
            code: 200,
            message: "Success".to_string(),
            data: Some(comment),
            audit_tx_id: Some(tx_id),
        }),
        Err(AuditError::WriteCancelled(CommitStatus::Committed { tx_id })) => {
            Json(MutationResponse {
                code: 200,
                message: "Success".to_string(),
                data: Some(comment),
                audit_tx_id: Some(tx_id),
            })
        }
        Err(AuditError::WriteFailed(failed)) => {
            tracing::error!(
                entity = COMMENTS_ENTITY,
                entity_id = comment.id,
                %action,
                attempts = failed.attempts,
                error = %failed.last_error,
                "mutation committed but unaudited; queued for reconciliation"
            );
            state.pending.push(*failed).await;
            Json(MutationResponse {
                code: 200,
                message: "Success (audit pending)".to_string(),
                data: Some(comment),
                audit_tx_id: None,
            })
        }
        Err(e) => {
            tracing::error!(entity = COMMENTS_ENTITY, entity_id = comment.id, %action, error = %e, "audit write rejected");
            Json(MutationResponse {
                code: 500,
                message: e.to_string(),
                data: Some(comment),
                audit_tx_id: None,
            })
        }
    }
}

async fn handle_create_comment(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CommentInput>,
) -> Json<MutationResponse> {
    let comment = state.comments.create(input).await;
    tracing::info!(id = comment.id, "comment created");
    audited(&state, AuditAction::Add, comment).await
}

async fn handle_list_comments(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Comment>>> {
    ApiResponse::ok(state.comments.list().await)
}

async fn handle_get_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Json<ApiResponse<Comment>> {
    match state.comments.get(id).await {
        Some(c) => ApiResponse::ok(c),
        None => ApiResponse::err(404, format!("Comment {} not found", id)),
    }
}

async fn handle_update_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<CommentInput>,
) -> Json<MutationResponse> {
    match state.comments.update(id, input).await {
        Some(comment) => {
            tracing::info!(id, "comment updated");
            audited(&state, AuditAction::Edit, comment).await
        }
        None => MutationResponse::not_found(id),
    }
}

async fn handle_delete_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Json<MutationResponse> {
    match state.comments.delete(id).await {
        Some(last) => {
            tracing::info!(id, "comment deleted");
            audited(&state, AuditAction::Delete, last).await
        }
        None => MutationResponse::not_found(id),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

fn query_error<T>(e: AuditError) -> Json<ApiResponse<T>> {
    let code = if e.is_timeout() { 504 } else { 500 };
    tracing::warn!(error = %e, "audit read failed");
    ApiResponse::err(code, e.to_string())
}

async fn handle_audit_logs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuditLogsQuery>,
) -> Json<ApiResponse<Vec<AuditRecord>>> {
    match state.queries.all_records(q.limit).await {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => query_error(e),
    }
}

async fn handle_audit_history(
    State(state): State<Arc<AppState>>,
    Path((entity, entity_id)): Path<(String, i64)>,
) -> Json<ApiResponse<Vec<AuditRecord>>> {
    match state.queries.history_of(&entity, entity_id).await {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => query_error(e),
    }
}

async fn handle_audit_lineage(
    State(state): State<Arc<AppState>>,
    Path((entity, entity_id)): Path<(String, i64)>,
) -> Json<ApiResponse<Vec<LineageViolation>>> {
    match state.queries.history_of(&entity, entity_id).await {
        Ok(records) => ApiResponse::ok(check_lineage(&records)),
        Err(e) => query_error(e),
    }
}

async fn handle_unaudited(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<PendingAudit>>> {
    ApiResponse::ok(state.pending.snapshot().await)
}

#[derive(Debug, Serialize)]
pub struct ReplayedAudit {
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: i64,
    pub tx_id: TxId,
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub replayed: Vec<ReplayedAudit>,
    pub still_pending: usize,
}

/// Replays queued mutations oldest first. Entries that fail again go back on the queue.
async fn handle_reconcile(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ReconcileReport>> {
    let mut replayed = Vec::new();
    for failed in state.pending.drain().await {
        let m = &failed.mutation;
        match state.recorder.record_mutation(m).await {
            Ok(tx_id) => {
                tracing::info!(entity = %m.entity, entity_id = m.entity_id, action = %m.action, tx_id, "unaudited mutation reconciled");
                replayed.push(ReplayedAudit {
                    action: m.action,
                    entity: m.entity.clone(),
                    entity_id: m.entity_id,
                    tx_id,
                });
            }
            Err(AuditError::WriteFailed(again)) => state.pending.push(*again).await,
            Err(e) if e.is_caller_error() => {
                tracing::error!(entity = %m.entity, entity_id = m.entity_id, error = %e, "dropping unreplayable audit entry");
            }
            Err(_) => state.pending.push(failed).await,
        }
    }
    let still_pending = state.pending.len().await;
    ApiResponse::ok(ReconcileReport {
        replayed,
        still_pending,
    })
}

async fn handle_health() -> &'static str {
    "ok"
}
