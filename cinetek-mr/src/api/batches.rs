//! Batch endpoints: start, inspect, cancel
//!
//! One batch runs at a time. Start handlers serialize on the cancellation
//! token map so two concurrent starts cannot both pass the guard.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::db::batches;
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchKind, BatchParameters, ReconcileBatch};
use crate::services::batch_runner::BatchRunner;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub batch_id: Uuid,
}

/// POST /reconcile/start
pub async fn start_reconcile(
    State(state): State<AppState>,
    Json(params): Json<BatchParameters>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    start_batch(state, BatchKind::Match, params).await
}

/// POST /apply/start
pub async fn start_apply(
    State(state): State<AppState>,
    Json(params): Json<BatchParameters>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    start_batch(state, BatchKind::Apply, params).await
}

async fn start_batch(
    state: AppState,
    kind: BatchKind,
    params: BatchParameters,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    params.validate().map_err(ApiError::BadRequest)?;

    // Write lock held across guard + insert: concurrent starts serialize here
    let mut tokens = state.cancellation_tokens.write().await;
    if !tokens.is_empty() || batches::has_running_batch(&state.db).await? {
        return Err(ApiError::Conflict("a batch is already running".to_string()));
    }

    let batch = ReconcileBatch::new(kind, params);
    batches::save_batch(&state.db, &batch).await?;

    let token = CancellationToken::new();
    tokens.insert(batch.batch_id, token.clone());
    drop(tokens);

    let batch_id = batch.batch_id;
    info!(batch_id = %batch_id, kind = kind.as_str(), "Batch accepted");

    let runner = BatchRunner::new(
        state.store.clone(),
        state.catalog.clone(),
        state.event_bus.clone(),
        state.user_id,
    );
    let tokens = state.cancellation_tokens.clone();
    tokio::spawn(async move {
        runner.run(batch, token).await;
        tokens.write().await.remove(&batch_id);
    });

    Ok((StatusCode::ACCEPTED, Json(StartResponse { batch_id })))
}

/// GET /batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<ReconcileBatch>> {
    Ok(Json(batches::load_batch(&state.db, batch_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BatchListParams {
    pub limit: Option<u32>,
}

/// GET /batches?limit=
pub async fn list_recent_batches(
    State(state): State<AppState>,
    Query(params): Query<BatchListParams>,
) -> ApiResult<Json<Vec<ReconcileBatch>>> {
    let limit = params.limit.unwrap_or(20).min(100);
    Ok(Json(batches::list_batches(&state.db, limit).await?))
}

/// POST /batches/{id}/cancel
///
/// Flags the batch's token; in-flight records finish, the rest are
/// released. The terminal CANCELLED state lands asynchronously.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    {
        let tokens = state.cancellation_tokens.read().await;
        if let Some(token) = tokens.get(&batch_id) {
            token.cancel();
            info!(batch_id = %batch_id, "Batch cancellation requested");
            return Ok(Json(json!({
                "batch_id": batch_id,
                "status": "cancelling",
            })));
        }
    }

    // Not running: 404 for unknown ids, 409 for terminal batches
    let batch = batches::load_batch(&state.db, batch_id).await?;
    Err(ApiError::Conflict(format!(
        "batch {} is {}",
        batch_id,
        batch.state.as_str()
    )))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/reconcile/start", post(start_reconcile))
        .route("/apply/start", post(start_apply))
        .route("/batches", get(list_recent_batches))
        .route("/batches/:id", get(get_batch))
        .route("/batches/:id/cancel", post(cancel_batch))
}
