//! Source adapters for the apply pass
//!
//! Each input source carries its own payload shape and writes different
//! side tables. The applier resolves the adapter for a record's source tag
//! and hands it a connection inside the canonical-write transaction, so an
//! adapter failure rolls the whole apply back.

pub mod disc;
pub mod nas;
pub mod seen;
pub mod watchlist;

use async_trait::async_trait;
use cinetek_common::{Error, Result};
use serde::de::DeserializeOwned;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ImportRecord, SourceKind};

/// Per-deployment context the adapters need (the library owner)
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    pub user_id: i64,
}

/// Source-specific canonical writes
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human label for the `sources` dictionary row
    fn label(&self) -> &'static str;

    /// Write the source payload for `film_id`. Runs inside the applier's
    /// transaction; returning an error rolls back the whole apply.
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ApplyContext,
        film_id: i64,
        record: &ImportRecord,
    ) -> Result<()>;
}

/// Registry of the built-in adapters, one per source tag
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn defaults() -> Self {
        let mut adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>> = HashMap::new();
        adapters.insert(SourceKind::Disc, Arc::new(disc::DiscAdapter));
        adapters.insert(SourceKind::Nas, Arc::new(nas::NasAdapter));
        adapters.insert(SourceKind::Seen, Arc::new(seen::SeenAdapter));
        adapters.insert(SourceKind::Watchlist, Arc::new(watchlist::WatchlistAdapter));
        Self { adapters }
    }

    pub fn get(&self, kind: SourceKind) -> Result<&Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| Error::InvalidInput(format!("no adapter for source {}", kind)))
    }
}

/// Parse a record's raw metadata into the adapter's payload shape.
///
/// Missing metadata yields the payload default; malformed JSON is a
/// record-level error.
fn parse_payload<T>(record: &ImportRecord) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match record.raw_metadata.as_deref() {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(text).map_err(|e| {
            Error::InvalidInput(format!(
                "record {} has malformed metadata: {}",
                record.record_id, e
            ))
        }),
        _ => Ok(T::default()),
    }
}
