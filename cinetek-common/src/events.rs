//! Event bus for the reconciler's progress stream
//!
//! Batch drivers emit [`ReconcileEvent`]s as records move through the state
//! machine; the SSE endpoint mirrors the stream to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a reconcile or apply batch runs
///
/// `kind` and `status` are the serialized forms of the service's
/// `BatchKind`/`MatchStatus` enums so the common crate stays free of the
/// domain model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconcileEvent {
    /// A batch driver started processing
    BatchStarted {
        batch_id: Uuid,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress update (after each processed record)
    BatchProgress {
        batch_id: Uuid,
        processed: u32,
        limit: u32,
        timestamp: DateTime<Utc>,
    },

    /// One record reached an outcome status
    RecordResolved {
        batch_id: Uuid,
        record_id: i64,
        status: String,
        external_id: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// Batch finished normally; counts per outcome
    BatchCompleted {
        batch_id: Uuid,
        processed: u32,
        matched: u32,
        ambiguous: u32,
        not_found: u32,
        applied: u32,
        error: u32,
        skipped: u32,
        timestamp: DateTime<Utc>,
    },

    /// Batch aborted on a driver-level failure (not a record failure)
    BatchFailed {
        batch_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch stopped by a cancel request
    BatchCancelled {
        batch_id: Uuid,
        processed: u32,
        timestamp: DateTime<Utc>,
    },
}

impl ReconcileEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconcileEvent::BatchStarted { .. } => "BatchStarted",
            ReconcileEvent::BatchProgress { .. } => "BatchProgress",
            ReconcileEvent::RecordResolved { .. } => "RecordResolved",
            ReconcileEvent::BatchCompleted { .. } => "BatchCompleted",
            ReconcileEvent::BatchFailed { .. } => "BatchFailed",
            ReconcileEvent::BatchCancelled { .. } => "BatchCancelled",
        }
    }
}

/// Broadcast bus carrying [`ReconcileEvent`]s to all subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReconcileEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring whether any subscriber is listening
    ///
    /// Progress events are advisory; a batch must run identically with
    /// zero SSE clients connected.
    pub fn emit(&self, event: ReconcileEvent) {
        let _ = self.tx.send(event);
    }

    /// Channel capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
