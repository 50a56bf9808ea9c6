//! Physical disc adapter
//!
//! Shelf inventory rows carry a list of format tags; one film can exist as
//! several editions but `physical_copies` keeps a single row per film with
//! the best format (4K over Blu-ray over DVD), last writer wins.

use async_trait::async_trait;
use cinetek_common::Result;
use serde::Deserialize;
use sqlx::SqliteConnection;

use super::{parse_payload, ApplyContext, SourceAdapter};
use crate::models::{ImportRecord, SourceKind};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscPayload {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub copies: Option<i64>,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub discs: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Map the inventory format tags to the stored format, by priority
pub fn primary_format(formats: &[String]) -> String {
    let has = |tag: &str| formats.iter().any(|f| f.eq_ignore_ascii_case(tag));
    if has("4K") {
        "UHD".to_string()
    } else if has("BR") {
        "BLURAY".to_string()
    } else if has("DVD") {
        "DVD".to_string()
    } else {
        formats
            .first()
            .map(|f| f.to_uppercase())
            .unwrap_or_else(|| "DVD".to_string())
    }
}

pub struct DiscAdapter;

#[async_trait]
impl SourceAdapter for DiscAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Disc
    }

    fn label(&self) -> &'static str {
        "Physical discs"
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        _ctx: &ApplyContext,
        film_id: i64,
        record: &ImportRecord,
    ) -> Result<()> {
        let payload: DiscPayload = parse_payload(record)?;
        let fmt = primary_format(&payload.formats);

        sqlx::query(
            r#"
            INSERT INTO physical_copies (film_id, fmt, copies, ean, discs, notes)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(film_id) DO UPDATE SET
                fmt = excluded.fmt,
                copies = excluded.copies,
                ean = excluded.ean,
                discs = excluded.discs,
                notes = excluded.notes
            "#,
        )
        .bind(film_id)
        .bind(&fmt)
        .bind(payload.copies.unwrap_or(1))
        .bind(&payload.ean)
        .bind(payload.discs)
        .bind(&payload.notes)
        .execute(conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;
    use chrono::Utc;
    use sqlx::SqlitePool;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn format_priority_prefers_uhd() {
        assert_eq!(primary_format(&tags(&["DVD", "4K", "BR"])), "UHD");
        assert_eq!(primary_format(&tags(&["DVD", "BR"])), "BLURAY");
        assert_eq!(primary_format(&tags(&["dvd"])), "DVD");
        assert_eq!(primary_format(&tags(&["VHS"])), "VHS");
        assert_eq!(primary_format(&tags(&[])), "DVD");
    }

    fn record(metadata: Option<&str>) -> ImportRecord {
        ImportRecord {
            record_id: 1,
            source: SourceKind::Disc,
            raw_title: "Heat [4K]".to_string(),
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
    async fn writes_one_copies_row_per_film() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 1 };

        let meta = r#"{"formats": ["BR", "4K"], "copies": 2, "ean": "3344556677889", "discs": 3}"#;
        DiscAdapter
            .apply(&mut conn, &ctx, 42, &record(Some(meta)))
            .await
            .unwrap();

        // Re-apply with a leaner edition: last writer wins
        DiscAdapter
            .apply(&mut conn, &ctx, 42, &record(Some(r#"{"formats": ["DVD"]}"#)))
            .await
            .unwrap();
        drop(conn);

        let (count, fmt, copies): (i64, String, i64) =
            sqlx::query_as("SELECT COUNT(*), MAX(fmt), MAX(copies) FROM physical_copies")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(fmt, "DVD");
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn missing_metadata_defaults_to_single_dvd() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 1 };

        DiscAdapter.apply(&mut conn, &ctx, 7, &record(None)).await.unwrap();
        drop(conn);

        let (fmt, copies): (String, i64) =
            sqlx::query_as("SELECT fmt, copies FROM physical_copies WHERE film_id = 7")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(fmt, "DVD");
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn malformed_metadata_is_an_error() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 1 };

        let result = DiscAdapter
            .apply(&mut conn, &ctx, 7, &record(Some("{not json")))
            .await;
        assert!(result.is_err());
    }
}
