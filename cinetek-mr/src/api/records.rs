//! Record endpoints: intake, inspection, and manual resolution

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::models::{ImportRecord, MatchStatus, NewRecord, SourceKind};
use crate::services::catalog::MovieDetails;
use crate::AppState;

const LIST_LIMIT_DEFAULT: u32 = 50;
const LIST_LIMIT_MAX: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub source: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /records?status=&source=&limit=&offset=
pub async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ImportRecord>>> {
    let status = match params.status.as_deref() {
        Some(s) => Some(
            MatchStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", s)))?,
        ),
        None => None,
    };
    let source = match params.source.as_deref() {
        Some(s) => Some(
            SourceKind::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown source: {}", s)))?,
        ),
        None => None,
    };
    let limit = params.limit.unwrap_or(LIST_LIMIT_DEFAULT).min(LIST_LIMIT_MAX);
    let offset = params.offset.unwrap_or(0);

    let records = state.store.list(status, source, limit, offset).await?;
    Ok(Json(records))
}

/// Counts per match status plus the total
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub total: i64,
    pub counts: BTreeMap<String, i64>,
}

/// GET /records/summary
pub async fn records_summary(State(state): State<AppState>) -> ApiResult<Json<SummaryResponse>> {
    let counts = state.store.status_counts().await?;
    let total = counts.iter().map(|(_, n)| n).sum();
    let counts = counts
        .into_iter()
        .map(|(status, n)| (status.as_str().to_string(), n))
        .collect();
    Ok(Json(SummaryResponse { total, counts }))
}

/// GET /records/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> ApiResult<Json<ImportRecord>> {
    Ok(Json(state.store.get(record_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    pub records: Vec<NewRecord>,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub inserted: u32,
}

/// POST /records
///
/// Intake for the out-of-process importers; everything lands PENDING.
pub async fn create_records(
    State(state): State<AppState>,
    Json(body): Json<IntakeRequest>,
) -> ApiResult<(StatusCode, Json<IntakeResponse>)> {
    if body.records.is_empty() {
        return Err(ApiError::BadRequest("records must not be empty".to_string()));
    }

    let inserted = state.store.insert_many(&body.records).await?;
    info!(inserted, "Accepted record intake");
    Ok((StatusCode::CREATED, Json(IntakeResponse { inserted })))
}

/// GET /records/{id}/candidates
///
/// Full catalog details for the tied candidates of an AMBIGUOUS record,
/// for a human to pick from.
pub async fn record_candidates(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> ApiResult<Json<Vec<MovieDetails>>> {
    let record = state.store.get(record_id).await?;
    if record.match_status != MatchStatus::Ambiguous {
        return Err(ApiError::BadRequest(format!(
            "record {} is {}, not AMBIGUOUS",
            record_id, record.match_status
        )));
    }

    let ids = record.tied_candidate_ids();
    let mut candidates = Vec::with_capacity(ids.len());
    for id in ids {
        candidates.push(state.catalog.movie_details(id).await?);
    }
    Ok(Json(candidates))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub external_id: Option<i64>,
    #[serde(default)]
    pub not_found: bool,
}

/// POST /records/{id}/resolve
///
/// Manual resolution of an AMBIGUOUS record: pick a candidate or declare
/// the record unmatchable.
pub async fn resolve_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<ImportRecord>> {
    let record = match (body.external_id, body.not_found) {
        (Some(_), true) => {
            return Err(ApiError::BadRequest(
                "provide external_id or not_found, not both".to_string(),
            ))
        }
        (Some(external_id), false) => {
            state
                .store
                .transition(record_id, MatchStatus::Matched, Some(external_id), Some("manual_fix"))
                .await?
        }
        (None, true) => {
            state
                .store
                .transition(record_id, MatchStatus::NotFound, None, Some("manual_not_found"))
                .await?
        }
        (None, false) => {
            return Err(ApiError::BadRequest(
                "provide external_id or not_found".to_string(),
            ))
        }
    };
    info!(record_id, status = %record.match_status, "Record resolved manually");
    Ok(Json(record))
}

/// POST /records/{id}/reset
///
/// Explicit re-entry to PENDING; the next match batch picks the record up.
pub async fn reset_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> ApiResult<Json<ImportRecord>> {
    let record = state
        .store
        .transition(record_id, MatchStatus::Pending, None, Some("reset"))
        .await?;
    info!(record_id, "Record reset to PENDING");
    Ok(Json(record))
}

/// Build record routes
pub fn record_routes() -> Router<AppState> {
    Router::new()
        .route("/records", get(list_records).post(create_records))
        .route("/records/summary", get(records_summary))
        .route("/records/:id", get(get_record))
        .route("/records/:id/candidates", get(record_candidates))
        .route("/records/:id/resolve", post(resolve_record))
        .route("/records/:id/reset", post(reset_record))
}
