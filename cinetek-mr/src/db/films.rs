//! Canonical film store writes
//!
//! Free functions over a `SqliteConnection` so the applier can run the whole
//! canonical write (film, genres, source link, adapter payload, record
//! update) inside a single transaction.

use chrono::Utc;
use cinetek_common::{Error, Result};
use sqlx::{Row, SqliteConnection};

use crate::services::catalog::{Genre, MovieDetails};

/// Insert or refresh the canonical film row for a catalog entry, keyed on
/// the external id. Returns the local `film_id`.
pub async fn upsert_film(conn: &mut SqliteConnection, details: &MovieDetails) -> Result<i64> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO films
            (tmdb_id, imdb_id, title, original_title, release_date, year,
             runtime_min, overview, original_language, popularity,
             vote_average, vote_count, poster_path, backdrop_path, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tmdb_id) DO UPDATE SET
            imdb_id = excluded.imdb_id,
            title = excluded.title,
            original_title = excluded.original_title,
            release_date = excluded.release_date,
            year = excluded.year,
            runtime_min = excluded.runtime_min,
            overview = excluded.overview,
            original_language = excluded.original_language,
            popularity = excluded.popularity,
            vote_average = excluded.vote_average,
            vote_count = excluded.vote_count,
            poster_path = excluded.poster_path,
            backdrop_path = excluded.backdrop_path,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(details.id)
    .bind(&details.imdb_id)
    .bind(&details.title)
    .bind(&details.original_title)
    .bind(&details.release_date)
    .bind(details.year())
    .bind(details.runtime)
    .bind(&details.overview)
    .bind(&details.original_language)
    .bind(details.popularity)
    .bind(details.vote_average)
    .bind(details.vote_count)
    .bind(&details.poster_path)
    .bind(&details.backdrop_path)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query("SELECT film_id FROM films WHERE tmdb_id = ?")
        .bind(details.id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::Internal(format!("film upsert lost tmdb_id {}", details.id)))?;

    Ok(row.try_get("film_id")?)
}

/// Upsert the genre dictionary entries and link them to a film
pub async fn upsert_genres(
    conn: &mut SqliteConnection,
    film_id: i64,
    genres: &[Genre],
) -> Result<()> {
    for genre in genres {
        sqlx::query(
            r#"
            INSERT INTO genres (genre_id, name) VALUES (?, ?)
            ON CONFLICT(genre_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(genre.id)
        .bind(&genre.name)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO film_genres (film_id, genre_id) VALUES (?, ?)
            ON CONFLICT(film_id, genre_id) DO NOTHING
            "#,
        )
        .bind(film_id)
        .bind(genre.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Look up or create a source dictionary row, returning its id
pub async fn ensure_source(conn: &mut SqliteConnection, code: &str, label: &str) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO sources (code, label) VALUES (?, ?)
        ON CONFLICT(code) DO UPDATE SET label = excluded.label
        "#,
    )
    .bind(code)
    .bind(label)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query("SELECT source_id FROM sources WHERE code = ?")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::Internal(format!("source upsert lost code {}", code)))?;

    Ok(row.try_get("source_id")?)
}

/// Record that a film was seen in a source; repeat links are no-ops
pub async fn link_film_source(
    conn: &mut SqliteConnection,
    film_id: i64,
    source_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO film_sources (film_id, source_id, added_at) VALUES (?, ?, ?)
        ON CONFLICT(film_id, source_id) DO NOTHING
        "#,
    )
    .bind(film_id)
    .bind(source_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    fn details(tmdb_id: i64, title: &str) -> MovieDetails {
        MovieDetails {
            id: tmdb_id,
            imdb_id: Some("tt0113277".to_string()),
            title: title.to_string(),
            original_title: title.to_string(),
            release_date: Some("1995-12-15".to_string()),
            runtime: Some(170),
            overview: Some("Heist thriller".to_string()),
            original_language: Some("en".to_string()),
            popularity: Some(45.2),
            vote_average: Some(8.3),
            vote_count: Some(7200),
            poster_path: Some("/heat.jpg".to_string()),
            backdrop_path: None,
            genres: vec![
                Genre { id: 28, name: "Action".to_string() },
                Genre { id: 80, name: "Crime".to_string() },
            ],
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        cinetek_common::db::init_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_film_dedupes_on_external_id() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = upsert_film(&mut conn, &details(949, "Heat")).await.unwrap();
        let second = upsert_film(&mut conn, &details(949, "Heat (director's cut)"))
            .await
            .unwrap();
        assert_eq!(first, second);
        drop(conn);

        let (count, title, year): (i64, String, i32) = sqlx::query_as(
            "SELECT COUNT(*), MAX(title), MAX(year) FROM films",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(title, "Heat (director's cut)");
        assert_eq!(year, 1995);
    }

    #[tokio::test]
    async fn genres_link_once_per_film() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let d = details(949, "Heat");
        let film_id = upsert_film(&mut conn, &d).await.unwrap();
        upsert_genres(&mut conn, film_id, &d.genres).await.unwrap();
        upsert_genres(&mut conn, film_id, &d.genres).await.unwrap();
        drop(conn);

        let (links,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM film_genres WHERE film_id = ?")
                .bind(film_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(links, 2);

        let (names,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM genres")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(names, 2);
    }

    #[tokio::test]
    async fn ensure_source_is_stable() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let a = ensure_source(&mut conn, "disc", "Physical discs").await.unwrap();
        let b = ensure_source(&mut conn, "disc", "Physical discs").await.unwrap();
        let c = ensure_source(&mut conn, "nas", "NAS library").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn film_source_links_are_idempotent() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let film_id = upsert_film(&mut conn, &details(949, "Heat")).await.unwrap();
        let source_id = ensure_source(&mut conn, "disc", "Physical discs").await.unwrap();
        link_film_source(&mut conn, film_id, source_id).await.unwrap();
        link_film_source(&mut conn, film_id, source_id).await.unwrap();
        drop(conn);

        let (links,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM film_sources")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(links, 1);
    }
}
