//! Seen-history adapter
//!
//! Tracker exports carry an optional rating and watch date. The film is
//! marked SEEN for the library user and the watch itself is recorded as an
//! event with context `import`, keeping export provenance visible next to
//! watches logged live later.

use async_trait::async_trait;
use chrono::Utc;
use cinetek_common::Result;
use serde::Deserialize;
use sqlx::SqliteConnection;

use super::{parse_payload, ApplyContext, SourceAdapter};
use crate::models::{ImportRecord, SourceKind};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeenPayload {
    #[serde(default)]
    pub rating_10: Option<f64>,
    #[serde(default)]
    pub watched_date: Option<String>,
}

pub struct SeenAdapter;

#[async_trait]
impl SourceAdapter for SeenAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Seen
    }

    fn label(&self) -> &'static str {
        "Seen history"
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ApplyContext,
        film_id: i64,
        record: &ImportRecord,
    ) -> Result<()> {
        let payload: SeenPayload = parse_payload(record)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO user_films (user_id, film_id, status, rating_10, updated_at)
            VALUES (?, ?, 'SEEN', ?, ?)
            ON CONFLICT(user_id, film_id) DO UPDATE SET
                status = 'SEEN',
                rating_10 = COALESCE(excluded.rating_10, user_films.rating_10),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ctx.user_id)
        .bind(film_id)
        .bind(payload.rating_10)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO watch_events (user_id, film_id, watched_date, context)
            VALUES (?, ?, ?, 'import')
            "#,
        )
        .bind(ctx.user_id)
        .bind(film_id)
        .bind(&payload.watched_date)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;
    use sqlx::SqlitePool;

    fn record(metadata: Option<&str>) -> ImportRecord {
        ImportRecord {
            record_id: 1,
            source: SourceKind::Seen,
            raw_title: "Heat".to_string(),
            raw_year: Some(1995),
            raw_director_hint: None,
            raw_metadata: metadata.map(str::to_string),
            match_status: MatchStatus::Matched,
            external_id: Some(949),
            match_note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn marks_seen_with_rating_and_event() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 5 };

        let meta = r#"{"rating_10": 9.0, "watched_date": "2023-11-12"}"#;
        SeenAdapter.apply(&mut conn, &ctx, 42, &record(Some(meta))).await.unwrap();
        drop(conn);

        let (status, rating): (String, Option<f64>) = sqlx::query_as(
            "SELECT status, rating_10 FROM user_films WHERE user_id = 5 AND film_id = 42",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "SEEN");
        assert_eq!(rating, Some(9.0));

        let (date, context): (Option<String>, String) = sqlx::query_as(
            "SELECT watched_date, context FROM watch_events WHERE user_id = 5 AND film_id = 42",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(date.as_deref(), Some("2023-11-12"));
        assert_eq!(context, "import");
    }

    #[tokio::test]
    async fn reapply_without_rating_keeps_existing_rating() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 5 };

        SeenAdapter
            .apply(&mut conn, &ctx, 42, &record(Some(r#"{"rating_10": 7.5}"#)))
            .await
            .unwrap();
        SeenAdapter.apply(&mut conn, &ctx, 42, &record(None)).await.unwrap();
        drop(conn);

        let (rating,): (Option<f64>,) =
            sqlx::query_as("SELECT rating_10 FROM user_films WHERE film_id = 42")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rating, Some(7.5));
    }
}
