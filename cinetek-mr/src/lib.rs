//! cinetek-mr library interface
//!
//! Exposes the reconciliation engine and HTTP surface for integration
//! testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::MatchStateStore;
use crate::services::catalog::MovieCatalog;
use cinetek_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Record store over the same pool
    pub store: MatchStateStore,
    /// External movie catalog client
    pub catalog: Arc<dyn MovieCatalog>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Library owner the apply adapters write for
    pub user_id: i64,
    /// Cancellation tokens for running batches
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        catalog: Arc<dyn MovieCatalog>,
        user_id: i64,
    ) -> Self {
        Self {
            store: MatchStateStore::new(db.clone()),
            db,
            catalog,
            event_bus,
            user_id,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::record_routes())
        .merge(api::batch_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
