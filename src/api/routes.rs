//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DeliverySource, ProcessingContext};
use crate::error::AppError;
use crate::handlers::{BatchResponse, ChangeFeedBatch};

use super::middleware::CorrelationId;
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

/// Query-string form of the read endpoint: `?accountid=...`
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(alias = "account_id")]
    pub accountid: Option<String>,
}

/// Read-path body; `account_total` is an integer when whole, a decimal otherwise
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub account_id: String,
    pub account_total: Value,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

// =========================================================================
// Router
// =========================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        // Read path
        .route("/summaries/:account_id", get(get_summary_by_path))
        // Query-string form
        .route("/summary", get(get_summary_by_query))
        // Change-feed ingestion
        .route("/stream/records", post(ingest_records))
}

// =========================================================================
// Handlers
// =========================================================================

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state
        .store
        .ping()
        .await
        .map_err(|e| AppError::BackendUnavailable(e.to_string()))?;
    Ok(Json(HealthResponse { status: "ok" }))
}

async fn get_summary_by_path(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    get_summary(&state, &account_id).await
}

async fn get_summary_by_query(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, AppError> {
    let account_id = query
        .accountid
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("accountid is required".to_string()))?;
    get_summary(&state, &account_id).await
}

async fn get_summary(state: &AppState, account_id: &str) -> Result<Json<SummaryResponse>, AppError> {
    let record = state
        .store
        .get_summary(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

    Ok(Json(SummaryResponse {
        account_total: record.account_total.to_json_number(),
        account_id: record.account_id,
    }))
}

async fn ingest_records(
    State(state): State<AppState>,
    correlation_id: Option<Extension<CorrelationId>>,
    payload: Result<Json<ChangeFeedBatch>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    let Json(batch) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let mut ctx = ProcessingContext::new(DeliverySource::ChangeFeed);
    if let Some(Extension(CorrelationId(id))) = correlation_id {
        ctx = ctx.with_correlation_id(id);
    }
    ctx.ensure_correlation_id();

    Ok(Json(state.stream_handler.handle(batch, &ctx).await))
}
