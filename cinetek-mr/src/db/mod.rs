//! Persistence layer for the reconciliation service

pub mod batches;
pub mod films;
pub mod records;

pub use records::MatchStateStore;
