//! Domain models for the Movie Reconciler

pub mod batch;
pub mod record;

pub use batch::{BatchKind, BatchParameters, BatchState, BatchTally, ReconcileBatch, MAX_WORKERS};
pub use record::{
    ImportRecord, MatchStatus, NewRecord, SourceKind, APPLIED_MARKER, ERROR_NOTE_MAX,
    NOTE_SEPARATOR, RESET_MARKER,
};
