//! Database access for the Cinetek services
//!
//! One shared SQLite file holds both the raw import records (the
//! reconciliation work queue) and the canonical film store the apply pass
//! writes into.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the file (and parent directory) when missing, then ensures the
/// schema exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize all Cinetek tables if they don't exist
///
/// Public so tests can bootstrap in-memory pools with the same schema the
/// service runs against.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Reconciliation work queue: one row per raw input record
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_records (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            raw_title TEXT NOT NULL,
            raw_year INTEGER,
            raw_director_hint TEXT,
            raw_metadata TEXT,
            match_status TEXT NOT NULL DEFAULT 'PENDING',
            external_id INTEGER,
            match_note TEXT,
            claim_batch TEXT,
            claimed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_import_records_status
            ON import_records (match_status, record_id)
        "#,
    )
    .execute(pool)
    .await?;

    // Canonical film store, deduplicated on the external catalog id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS films (
            film_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tmdb_id INTEGER NOT NULL UNIQUE,
            imdb_id TEXT,
            title TEXT NOT NULL,
            original_title TEXT,
            release_date TEXT,
            year INTEGER,
            runtime_min INTEGER,
            overview TEXT,
            original_language TEXT,
            popularity REAL,
            vote_average REAL,
            vote_count INTEGER,
            poster_path TEXT,
            backdrop_path TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS genres (
            genre_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS film_genres (
            film_id INTEGER NOT NULL,
            genre_id INTEGER NOT NULL,
            PRIMARY KEY (film_id, genre_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Where a film came from: one row per (film, source) pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            label TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS film_sources (
            film_id INTEGER NOT NULL,
            source_id INTEGER NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY (film_id, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Source-specific payloads written by the apply adapters
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS physical_copies (
            film_id INTEGER PRIMARY KEY,
            fmt TEXT NOT NULL,
            copies INTEGER NOT NULL DEFAULT 1,
            ean TEXT,
            discs INTEGER,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nas_files (
            file_path TEXT PRIMARY KEY,
            film_id INTEGER NOT NULL,
            file_name TEXT,
            date_added TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_films (
            user_id INTEGER NOT NULL,
            film_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            rating_10 REAL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, film_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watch_events (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            film_id INTEGER NOT NULL,
            watched_date TEXT,
            context TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Batch driver bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_batches (
            batch_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            parameters TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            tally TEXT NOT NULL DEFAULT '{}',
            message TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
