//! NAS library adapter
//!
//! Rip inventory rows are keyed by file path, so the same file re-imported
//! later just refreshes its film link.

use async_trait::async_trait;
use cinetek_common::Result;
use serde::Deserialize;
use sqlx::SqliteConnection;

use super::{parse_payload, ApplyContext, SourceAdapter};
use crate::models::{ImportRecord, SourceKind};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NasPayload {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub date_added: Option<String>,
}

pub struct NasAdapter;

#[async_trait]
impl SourceAdapter for NasAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Nas
    }

    fn label(&self) -> &'static str {
        "NAS library"
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        _ctx: &ApplyContext,
        film_id: i64,
        record: &ImportRecord,
    ) -> Result<()> {
        let payload: NasPayload = parse_payload(record)?;

        // Exports that predate path tracking only carry the title
        let file_path = payload
            .file_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| record.raw_title.clone());
        let file_name = payload.file_name.unwrap_or_else(|| {
            file_path
                .rsplit('/')
                .next()
                .unwrap_or(file_path.as_str())
                .to_string()
        });

        sqlx::query(
            r#"
            INSERT INTO nas_files (file_path, film_id, file_name, date_added)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                film_id = excluded.film_id,
                file_name = excluded.file_name,
                date_added = COALESCE(excluded.date_added, nas_files.date_added)
            "#,
        )
        .bind(&file_path)
        .bind(film_id)
        .bind(&file_name)
        .bind(&payload.date_added)
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

    fn record(metadata: Option<&str>) -> ImportRecord {
        ImportRecord {
            record_id: 1,
            source: SourceKind::Nas,
            raw_title: "Heat (1995).mkv".to_string(),
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
    async fn upserts_by_path_and_keeps_first_date() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 1 };

        let meta = r#"{"file_path": "/films/Heat (1995).mkv", "date_added": "2024-02-01"}"#;
        NasAdapter.apply(&mut conn, &ctx, 42, &record(Some(meta))).await.unwrap();

        // Same path reconciled again, no date this time
        let meta = r#"{"file_path": "/films/Heat (1995).mkv"}"#;
        NasAdapter.apply(&mut conn, &ctx, 43, &record(Some(meta))).await.unwrap();
        drop(conn);

        let rows: Vec<(String, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT file_path, film_id, file_name, date_added FROM nas_files",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "/films/Heat (1995).mkv");
        assert_eq!(rows[0].1, 43);
        assert_eq!(rows[0].2, "Heat (1995).mkv");
        assert_eq!(rows[0].3.as_deref(), Some("2024-02-01"));
    }

    #[tokio::test]
    async fn falls_back_to_title_when_path_missing() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let ctx = ApplyContext { user_id: 1 };

        NasAdapter.apply(&mut conn, &ctx, 42, &record(None)).await.unwrap();
        drop(conn);

        let (path,): (String,) = sqlx::query_as("SELECT file_path FROM nas_files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(path, "Heat (1995).mkv");
    }
}
