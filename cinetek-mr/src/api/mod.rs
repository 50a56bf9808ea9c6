//! HTTP API handlers for cinetek-mr

pub mod batches;
pub mod health;
pub mod records;
pub mod sse;

pub use batches::batch_routes;
pub use health::health_routes;
pub use records::record_routes;
pub use sse::event_stream;
