//! Apply pass: materialize confirmed matches into the canonical store
//!
//! One record at a time: full details are fetched from the catalog outside
//! the transaction, then the film, its genres, the source linkage, the
//! source payload, and the record's own APPLIED transition commit together.
//! Any failure inside the transaction rolls back every write for the
//! record; the driver turns the error into an ERROR transition.

use chrono::Utc;
use std::sync::Arc;

use crate::db::{films, MatchStateStore};
use crate::models::{ImportRecord, MatchStatus, APPLIED_MARKER, NOTE_SEPARATOR};
use crate::services::catalog::MovieCatalog;
use crate::services::{PipelineError, PipelineResult};
use crate::sources::{AdapterRegistry, ApplyContext};
use tracing::{debug, warn};

/// What an apply attempt did
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { film_id: i64 },
    /// Nothing written: idempotency marker already present, or the record
    /// changed state under us and the writes were discarded
    AlreadyApplied,
}

pub struct Applier {
    catalog: Arc<dyn MovieCatalog>,
    adapters: AdapterRegistry,
    ctx: ApplyContext,
}

impl Applier {
    pub fn new(catalog: Arc<dyn MovieCatalog>, adapters: AdapterRegistry, user_id: i64) -> Self {
        Self {
            catalog,
            adapters,
            ctx: ApplyContext { user_id },
        }
    }

    pub async fn apply(
        &self,
        store: &MatchStateStore,
        record: &ImportRecord,
    ) -> PipelineResult<ApplyOutcome> {
        // Checked before any write: re-invoking apply is a guaranteed no-op
        if record.is_marked_applied() {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        if record.match_status != MatchStatus::Matched {
            return Err(PipelineError::Invalid(format!(
                "record {} is {}, not MATCHED",
                record.record_id, record.match_status
            )));
        }
        let external_id = record.external_id.ok_or_else(|| {
            PipelineError::Invalid(format!("record {} has no external id", record.record_id))
        })?;
        let adapter = self.adapters.get(record.source)?;

        let details = self.catalog.movie_details(external_id).await?;

        let mut tx = store.pool().begin().await?;

        let film_id = films::upsert_film(&mut *tx, &details).await?;
        films::upsert_genres(&mut *tx, film_id, &details.genres).await?;
        let source_id =
            films::ensure_source(&mut *tx, record.source.as_str(), adapter.label()).await?;
        films::link_film_source(&mut *tx, film_id, source_id).await?;
        adapter.apply(&mut *tx, &self.ctx, film_id, record).await?;

        // Same transaction: the marker and APPLIED land with the writes or
        // not at all. The status guard catches a record changed under us.
        let note = match record.match_note.as_deref() {
            Some(existing) if !existing.is_empty() => {
                format!("{}{}{}", existing, NOTE_SEPARATOR, APPLIED_MARKER)
            }
            _ => APPLIED_MARKER.to_string(),
        };
        let result = sqlx::query(
            r#"
            UPDATE import_records
            SET match_status = 'APPLIED', match_note = ?,
                claim_batch = NULL, claimed_at = NULL, updated_at = ?
            WHERE record_id = ? AND match_status = 'MATCHED'
            "#,
        )
        .bind(&note)
        .bind(Utc::now().to_rfc3339())
        .bind(record.record_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            // Another writer (or a manual reset) got to the record after our
            // snapshot; drop the transaction and let the current state stand.
            warn!(
                record_id = record.record_id,
                "Record changed state during apply, discarding writes"
            );
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        tx.commit().await?;

        debug!(
            record_id = record.record_id,
            external_id, film_id, "Applied record to canonical store"
        );
        Ok(ApplyOutcome::Applied { film_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecord, SourceKind};
    use crate::services::catalog::{CatalogError, Genre, MovieDetails};
    use async_trait::async_trait;
    use serde_json::json;
    use sqlx::SqlitePool;
    use std::collections::HashMap;

    struct StubCatalog {
        details: HashMap<i64, MovieDetails>,
    }

    #[async_trait]
    impl MovieCatalog for StubCatalog {
        async fn search_movies(
            &self,
            _query: &str,
            _year: Option<i32>,
        ) -> Result<Vec<crate::services::catalog::MovieCandidate>, CatalogError> {
            Ok(Vec::new())
        }

        async fn movie_directors(&self, _movie_id: i64) -> Result<Vec<String>, CatalogError> {
            Ok(Vec::new())
        }

        async fn movie_details(&self, movie_id: i64) -> Result<MovieDetails, CatalogError> {
            self.details
                .get(&movie_id)
                .cloned()
                .ok_or_else(|| CatalogError::Unavailable(format!("no details for {}", movie_id)))
        }
    }

    fn heat_details() -> MovieDetails {
        MovieDetails {
            id: 949,
            imdb_id: Some("tt0113277".to_string()),
            title: "Heat".to_string(),
            original_title: "Heat".to_string(),
            release_date: Some("1995-12-15".to_string()),
            runtime: Some(170),
            overview: Some("Heist thriller".to_string()),
            original_language: Some("en".to_string()),
            popularity: Some(45.2),
            vote_average: Some(8.3),
            vote_count: Some(7200),
            poster_path: None,
            backdrop_path: None,
            genres: vec![
                Genre { id: 28, name: "Action".to_string() },
                Genre { id: 80, name: "Crime".to_string() },
            ],
        }
    }

    fn applier_with(details: Vec<MovieDetails>) -> Applier {
        let mut map = HashMap::new();
        for d in details {
            map.insert(d.id, d);
        }
        Applier::new(
            Arc::new(StubCatalog { details: map }),
            AdapterRegistry::defaults(),
            1,
        )
    }

    async fn store_with_matched(
        source: SourceKind,
        metadata: Option<serde_json::Value>,
    ) -> (MatchStateStore, ImportRecord) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let store = MatchStateStore::new(pool);
        let id = store
            .insert(&NewRecord {
                source,
                raw_title: "Heat".to_string(),
                raw_year: Some(1995),
                raw_director_hint: None,
                raw_metadata: metadata,
            })
            .await
            .unwrap();
        let record = store
            .transition(id, MatchStatus::Matched, Some(949), Some("score=8"))
            .await
            .unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn apply_writes_film_links_and_payload() {
        let (store, record) =
            store_with_matched(SourceKind::Disc, Some(json!({"formats": ["4K", "BR"]}))).await;
        let applier = applier_with(vec![heat_details()]);

        let outcome = applier.apply(&store, &record).await.unwrap();
        let film_id = match outcome {
            ApplyOutcome::Applied { film_id } => film_id,
            other => panic!("expected Applied, got {:?}", other),
        };

        let (tmdb_id, title): (i64, String) =
            sqlx::query_as("SELECT tmdb_id, title FROM films WHERE film_id = ?")
                .bind(film_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(tmdb_id, 949);
        assert_eq!(title, "Heat");

        let (genre_links,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM film_genres WHERE film_id = ?")
                .bind(film_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(genre_links, 2);

        let (fmt,): (String,) =
            sqlx::query_as("SELECT fmt FROM physical_copies WHERE film_id = ?")
                .bind(film_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(fmt, "UHD");

        let (source_links,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM film_sources fs \
             JOIN sources s ON s.source_id = fs.source_id WHERE s.code = 'disc'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(source_links, 1);

        let updated = store.get(record.record_id).await.unwrap();
        assert_eq!(updated.match_status, MatchStatus::Applied);
        assert_eq!(updated.external_id, Some(949));
        assert_eq!(updated.match_note.as_deref(), Some("score=8 | applied"));
    }

    #[tokio::test]
    async fn second_apply_is_a_no_op() {
        let (store, record) = store_with_matched(SourceKind::Seen, None).await;
        let applier = applier_with(vec![heat_details()]);

        applier.apply(&store, &record).await.unwrap();
        let applied = store.get(record.record_id).await.unwrap();
        let outcome = applier.apply(&store, &applied).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyApplied);

        // One watch event, not two
        let (events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watch_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(events, 1);
    }

    #[tokio::test]
    async fn state_change_under_apply_discards_writes() {
        let (store, record) = store_with_matched(SourceKind::Disc, None).await;
        let applier = applier_with(vec![heat_details()]);

        // A reset lands between the snapshot and the apply
        store
            .transition(record.record_id, MatchStatus::Pending, None, Some("reset"))
            .await
            .unwrap();

        let outcome = applier.apply(&store, &record).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyApplied);

        let (films,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM films")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(films, 0);

        let current = store.get(record.record_id).await.unwrap();
        assert_eq!(current.match_status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn adapter_failure_rolls_back_canonical_writes() {
        let (store, record) = store_with_matched(SourceKind::Disc, None).await;
        // Malformed payload only fails inside the transaction, after the
        // film row was upserted
        sqlx::query("UPDATE import_records SET raw_metadata = '{not json' WHERE record_id = ?")
            .bind(record.record_id)
            .execute(store.pool())
            .await
            .unwrap();
        let record = store.get(record.record_id).await.unwrap();

        let applier = applier_with(vec![heat_details()]);
        let result = applier.apply(&store, &record).await;
        assert!(result.is_err());

        let (films,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM films")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(films, 0);

        // Status untouched; the batch driver owns the ERROR transition
        let after = store.get(record.record_id).await.unwrap();
        assert_eq!(after.match_status, MatchStatus::Matched);
    }

    #[tokio::test]
    async fn details_failure_leaves_no_writes() {
        let (store, record) = store_with_matched(SourceKind::Disc, None).await;
        let applier = applier_with(Vec::new());

        let result = applier.apply(&store, &record).await;
        assert!(matches!(result, Err(PipelineError::Catalog(_))));

        let (films,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM films")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(films, 0);
    }

    #[tokio::test]
    async fn unmatched_record_is_rejected() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let store = MatchStateStore::new(pool);
        let id = store
            .insert(&NewRecord {
                source: SourceKind::Disc,
                raw_title: "Heat".to_string(),
                raw_year: None,
                raw_director_hint: None,
                raw_metadata: None,
            })
            .await
            .unwrap();
        let record = store.get(id).await.unwrap();

        let applier = applier_with(vec![heat_details()]);
        let result = applier.apply(&store, &record).await;
        assert!(matches!(result, Err(PipelineError::Invalid(_))));
    }
}
