//! Watchlist adapter
//!
//! Marks the film WATCHLIST for the library user. A film already marked
//! SEEN stays SEEN; the watchlist export is older information.

use async_trait::async_trait;
use chrono::Utc;
use cinetek_common::Result;
use serde::Deserialize;
use sqlx::SqliteConnection;

use super::{parse_payload, ApplyContext, SourceAdapter};
use crate::models::{ImportRecord, SourceKind};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchlistPayload {
    #[serde(default)]
    pub added_date: Option<String>,
}

pub struct WatchlistAdapter;

#[async_trait]
impl SourceAdapter for WatchlistAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Watchlist
    }

    fn label(&self) -> &'static str {
        "Watchlist"
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ApplyContext,
        film_id: i64,
        record: &ImportRecord,
    ) -> Result<()> {
        let payload: WatchlistPayload = parse_payload(record)?;
        let updated_at = payload
            .added_date
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO user_films (user_id, film_id, status, rating_10, updated_at)
            VALUES (?, ?, 'WATCHLIST', NULL, ?)
            ON CONFLICT(user_id, film_id) DO UPDATE SET
                status = CASE
                    WHEN user_films.status = 'SEEN' THEN user_films.status
                    ELSE 'WATCHLIST'
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(ctx.user_id)
        .bind(film_id)
        .bind(&updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}
