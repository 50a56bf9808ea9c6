//! Shared infrastructure for the Cinetek services
//!
//! Error type, configuration loading, database bootstrap, and the
//! broadcast event bus used by the reconciler's SSE stream.

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
