//! Reconciliation record persistence and state transitions
//!
//! All writes to `import_records` flow through [`MatchStateStore`] so the
//! state machine and the `external_id` invariant are enforced in one place.
//! Batch claiming uses the `claim_batch` column as a lightweight lease: a
//! conditional update that only one driver can win per record.

use chrono::{DateTime, Utc};
use cinetek_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::record::{
    truncate_note_text, ImportRecord, MatchStatus, NewRecord, SourceKind, NOTE_SEPARATOR,
};

/// Store for `import_records` rows
#[derive(Clone)]
pub struct MatchStateStore {
    pool: SqlitePool,
}

impl MatchStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one raw record in PENDING
    pub async fn insert(&self, record: &NewRecord) -> Result<i64> {
        let metadata = match &record.raw_metadata {
            Some(value) => Some(serde_json::to_string(value).map_err(|e| {
                Error::InvalidInput(format!("raw_metadata is not serializable: {}", e))
            })?),
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO import_records
                (source, raw_title, raw_year, raw_director_hint, raw_metadata,
                 match_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)
            "#,
        )
        .bind(record.source.as_str())
        .bind(&record.raw_title)
        .bind(record.raw_year)
        .bind(&record.raw_director_hint)
        .bind(&metadata)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a batch of raw records in one transaction
    pub async fn insert_many(&self, records: &[NewRecord]) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0u32;

        for record in records {
            let metadata = match &record.raw_metadata {
                Some(value) => Some(serde_json::to_string(value).map_err(|e| {
                    Error::InvalidInput(format!("raw_metadata is not serializable: {}", e))
                })?),
                None => None,
            };
            sqlx::query(
                r#"
                INSERT INTO import_records
                    (source, raw_title, raw_year, raw_director_hint, raw_metadata,
                     match_status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)
                "#,
            )
            .bind(record.source.as_str())
            .bind(&record.raw_title)
            .bind(record.raw_year)
            .bind(&record.raw_director_hint)
            .bind(&metadata)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Load one record
    pub async fn get(&self, record_id: i64) -> Result<ImportRecord> {
        let row = sqlx::query(
            r#"
            SELECT record_id, source, raw_title, raw_year, raw_director_hint,
                   raw_metadata, match_status, external_id, match_note,
                   created_at, updated_at
            FROM import_records
            WHERE record_id = ?
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => map_record(&row),
            None => Err(Error::NotFound(format!("record {}", record_id))),
        }
    }

    /// List records, optionally filtered by status and source
    pub async fn list(
        &self,
        status: Option<MatchStatus>,
        source: Option<SourceKind>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ImportRecord>> {
        let mut sql = String::from(
            "SELECT record_id, source, raw_title, raw_year, raw_director_hint, \
             raw_metadata, match_status, external_id, match_note, \
             created_at, updated_at FROM import_records",
        );
        let mut clauses = Vec::new();
        if status.is_some() {
            clauses.push("match_status = ?");
        }
        if source.is_some() {
            clauses.push("source = ?");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY record_id LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(source) = source {
            query = query.bind(source.as_str());
        }
        query = query.bind(limit as i64).bind(offset as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(map_record).collect()
    }

    /// Counts per match status, for batch summaries and the summary endpoint
    pub async fn status_counts(&self) -> Result<Vec<(MatchStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT match_status, COUNT(*) AS n FROM import_records GROUP BY match_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::new();
        for row in rows {
            let status_text: String = row.try_get("match_status")?;
            let n: i64 = row.try_get("n")?;
            match MatchStatus::parse(&status_text) {
                Some(status) => counts.push((status, n)),
                None => warn!(status = %status_text, "Unknown match_status in database"),
            }
        }
        Ok(counts)
    }

    /// Claim up to `page_size` unclaimed records in the target statuses for
    /// `batch_id`. When `reenter_pending` is set (match batches), claimed
    /// records re-enter PENDING with `external_id` cleared so every outcome
    /// transition originates from PENDING.
    ///
    /// The conditional update is the lease: losing the race on a record
    /// just drops it from this page.
    pub async fn claim_page(
        &self,
        batch_id: Uuid,
        statuses: &[MatchStatus],
        source: Option<SourceKind>,
        page_size: u32,
        reenter_pending: bool,
    ) -> Result<Vec<ImportRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut sql = format!(
            "SELECT record_id FROM import_records \
             WHERE match_status IN ({}) AND claim_batch IS NULL",
            placeholders
        );
        if source.is_some() {
            sql.push_str(" AND source = ?");
        }
        sql.push_str(" ORDER BY record_id LIMIT ?");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        if let Some(source) = source {
            query = query.bind(source.as_str());
        }
        query = query.bind(page_size as i64);

        let candidate_ids = query.fetch_all(&self.pool).await?;
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now().to_rfc3339();
        let batch = batch_id.to_string();
        let mut claimed = Vec::new();

        for record_id in candidate_ids {
            let update = if reenter_pending {
                sqlx::query(
                    r#"
                    UPDATE import_records
                    SET claim_batch = ?, claimed_at = ?, updated_at = ?,
                        match_status = 'PENDING', external_id = NULL
                    WHERE record_id = ? AND claim_batch IS NULL
                    "#,
                )
            } else {
                sqlx::query(
                    r#"
                    UPDATE import_records
                    SET claim_batch = ?, claimed_at = ?, updated_at = ?
                    WHERE record_id = ? AND claim_batch IS NULL
                    "#,
                )
            };

            let result = update
                .bind(&batch)
                .bind(&now)
                .bind(&now)
                .bind(record_id)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 1 {
                claimed.push(self.get(record_id).await?);
            } else {
                debug!(record_id, "Lost claim race, skipping record");
            }
        }

        Ok(claimed)
    }

    /// Commit a state transition, enforcing the state machine and the
    /// `external_id` invariant, appending `note` (truncated) to the audit
    /// trail, and releasing any claim on the record.
    pub async fn transition(
        &self,
        record_id: i64,
        to: MatchStatus,
        external_id: Option<i64>,
        note: Option<&str>,
    ) -> Result<ImportRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT match_status, external_id, match_note FROM import_records WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("record {}", record_id)))?;

        let current_text: String = row.try_get("match_status")?;
        let current = MatchStatus::parse(&current_text)
            .ok_or_else(|| Error::Internal(format!("corrupt match_status: {}", current_text)))?;
        let current_external: Option<i64> = row.try_get("external_id")?;
        let current_note: Option<String> = row.try_get("match_note")?;

        if !current.can_transition(to) {
            return Err(Error::InvalidInput(format!(
                "illegal transition {} -> {} for record {}",
                current, to, record_id
            )));
        }

        // external_id is set iff the target status carries a resolved match
        let new_external = if to.requires_external_id() {
            let id = match to {
                MatchStatus::Applied => external_id.or(current_external),
                _ => external_id,
            };
            Some(id.ok_or_else(|| {
                Error::InvalidInput(format!("{} requires an external id", to))
            })?)
        } else {
            None
        };

        let new_note = match note {
            Some(chunk) => {
                let chunk = truncate_note_text(chunk);
                match current_note {
                    Some(existing) if !existing.is_empty() => {
                        Some(format!("{}{}{}", existing, NOTE_SEPARATOR, chunk))
                    }
                    _ => Some(chunk),
                }
            }
            None => current_note,
        };

        sqlx::query(
            r#"
            UPDATE import_records
            SET match_status = ?, external_id = ?, match_note = ?,
                claim_batch = NULL, claimed_at = NULL, updated_at = ?
            WHERE record_id = ?
            "#,
        )
        .bind(to.as_str())
        .bind(new_external)
        .bind(&new_note)
        .bind(Utc::now().to_rfc3339())
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            record_id,
            from = %current,
            to = %to,
            external_id = ?new_external,
            "Record transition"
        );

        self.get(record_id).await
    }

    /// Release every claim held by a batch (cancellation path)
    pub async fn release_claims(&self, batch_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE import_records SET claim_batch = NULL, claimed_at = NULL, updated_at = ? \
             WHERE claim_batch = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(batch_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Startup cleanup: no batch can be running, so any surviving claim is
    /// an orphan from a crash.
    pub async fn release_all_claims(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE import_records SET claim_batch = NULL, claimed_at = NULL, updated_at = ? \
             WHERE claim_batch IS NOT NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        let released = result.rows_affected();
        if released > 0 {
            warn!(released, "Released orphaned record claims at startup");
        }
        Ok(released)
    }
}

fn map_record(row: &SqliteRow) -> Result<ImportRecord> {
    let source_text: String = row.try_get("source")?;
    let source = SourceKind::parse(&source_text)
        .ok_or_else(|| Error::Internal(format!("unknown source tag: {}", source_text)))?;

    let status_text: String = row.try_get("match_status")?;
    let match_status = MatchStatus::parse(&status_text)
        .ok_or_else(|| Error::Internal(format!("corrupt match_status: {}", status_text)))?;

    Ok(ImportRecord {
        record_id: row.try_get("record_id")?,
        source,
        raw_title: row.try_get("raw_title")?,
        raw_year: row.try_get("raw_year")?,
        raw_director_hint: row.try_get("raw_director_hint")?,
        raw_metadata: row.try_get("raw_metadata")?,
        match_status,
        external_id: row.try_get("external_id")?,
        match_note: row.try_get("match_note")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("failed to parse {}: {}", column, e)))
}
