use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use shipwright_core::audit::{AuditRecord, AuditStatus};
use shipwright_core::CoreError;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

/// GET /api/update/audits?limit=&status=, newest first
pub async fn list_audits(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AuditStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let audit = Arc::clone(&app.audit);
    let records = tokio::task::spawn_blocking(move || match status {
        Some(status) => audit.list_by_status(status).map(|mut records| {
            records.truncate(limit);
            records
        }),
        None => audit.list(limit),
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(records))
}

/// GET /api/update/audits/latest
pub async fn latest_audit(State(app): State<AppState>) -> Result<Json<AuditRecord>, AppError> {
    let audit = Arc::clone(&app.audit);
    let record = tokio::task::spawn_blocking(move || audit.latest())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    record
        .map(Json)
        .ok_or_else(|| AppError::not_found("no update attempts recorded"))
}

/// GET /api/update/audits/{id}
pub async fn get_audit(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuditRecord>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::bad_request(format!("invalid audit id '{id}'")))?;
    let audit = Arc::clone(&app.audit);
    let record = tokio::task::spawn_blocking(move || audit.get(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(record.ok_or(CoreError::AuditNotFound(id))?))
}
