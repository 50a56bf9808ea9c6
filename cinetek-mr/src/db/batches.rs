//! Batch row persistence
//!
//! The driver saves its row on every meaningful change (start, page
//! boundary, finish) so `GET /batches/{id}` reflects live progress and a
//! crash leaves an inspectable RUNNING row to be flagged at startup.

use chrono::{DateTime, Utc};
use cinetek_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::models::{BatchKind, BatchState, ReconcileBatch};

/// Insert or update one batch row
pub async fn save_batch(pool: &SqlitePool, batch: &ReconcileBatch) -> Result<()> {
    let parameters = serde_json::to_string(&batch.parameters)
        .map_err(|e| Error::Internal(format!("failed to serialize batch parameters: {}", e)))?;
    let tally = serde_json::to_string(&batch.tally)
        .map_err(|e| Error::Internal(format!("failed to serialize batch tally: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO reconcile_batches
            (batch_id, kind, state, parameters, processed, tally, message,
             started_at, ended_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id) DO UPDATE SET
            state = excluded.state,
            processed = excluded.processed,
            tally = excluded.tally,
            message = excluded.message,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(batch.batch_id.to_string())
    .bind(batch.kind.as_str())
    .bind(batch.state.as_str())
    .bind(&parameters)
    .bind(batch.processed as i64)
    .bind(&tally)
    .bind(&batch.message)
    .bind(batch.started_at.to_rfc3339())
    .bind(batch.ended_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one batch row
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<ReconcileBatch> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, kind, state, parameters, processed, tally, message,
               started_at, ended_at
        FROM reconcile_batches
        WHERE batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;

    let kind_text: String = row.try_get("kind")?;
    let kind = BatchKind::parse(&kind_text)
        .ok_or_else(|| Error::Internal(format!("corrupt batch kind: {}", kind_text)))?;

    let state_text: String = row.try_get("state")?;
    let state = BatchState::parse(&state_text)
        .ok_or_else(|| Error::Internal(format!("corrupt batch state: {}", state_text)))?;

    let parameters_text: String = row.try_get("parameters")?;
    let parameters = serde_json::from_str(&parameters_text)
        .map_err(|e| Error::Internal(format!("failed to parse batch parameters: {}", e)))?;

    let tally_text: String = row.try_get("tally")?;
    let tally = serde_json::from_str(&tally_text)
        .map_err(|e| Error::Internal(format!("failed to parse batch tally: {}", e)))?;

    let started_text: String = row.try_get("started_at")?;
    let started_at = DateTime::parse_from_rfc3339(&started_text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("failed to parse started_at: {}", e)))?;

    let ended_at = match row.try_get::<Option<String>, _>("ended_at")? {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("failed to parse ended_at: {}", e)))?,
        ),
        None => None,
    };

    Ok(ReconcileBatch {
        batch_id,
        kind,
        state,
        parameters,
        processed: row.try_get::<i64, _>("processed")? as u32,
        tally,
        message: row.try_get("message")?,
        started_at,
        ended_at,
    })
}

/// Recent batches, newest first
pub async fn list_batches(pool: &SqlitePool, limit: u32) -> Result<Vec<ReconcileBatch>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT batch_id FROM reconcile_batches ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut batches = Vec::with_capacity(ids.len());
    for id in ids {
        let batch_id = Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("corrupt batch_id {}: {}", id, e)))?;
        batches.push(load_batch(pool, batch_id).await?);
    }
    Ok(batches)
}

/// Whether any batch row is still RUNNING (one driver at a time)
pub async fn has_running_batch(pool: &SqlitePool) -> Result<bool> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM reconcile_batches WHERE state = 'RUNNING'")
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Startup cleanup: no driver can be running, so RUNNING rows are orphans
/// from a crash. Flag them FAILED so the single-batch guard does not
/// deadlock on a ghost.
pub async fn fail_stale_running(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE reconcile_batches
        SET state = 'FAILED', message = 'interrupted by service restart', ended_at = ?
        WHERE state = 'RUNNING'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let flagged = result.rows_affected();
    if flagged > 0 {
        warn!(flagged, "Flagged interrupted batches at startup");
    }
    Ok(flagged)
}
