//! Reconciliation engine services

pub mod applier;
pub mod batch_runner;
pub mod catalog;
pub mod matcher;
pub mod normalizer;
pub mod scorer;

use thiserror::Error;

/// Failures crossing the engine's internal boundaries
///
/// Worker code converts these into record-level ERROR transitions; they
/// never abort a batch.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("catalog: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] cinetek_common::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Result type for engine operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
