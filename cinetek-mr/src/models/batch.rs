//! Batch driver bookkeeping
//!
//! One `ReconcileBatch` row per driver invocation, persisted so operators
//! can inspect outcomes and the service can flag batches orphaned by a
//! crash at startup.

use crate::models::record::{MatchStatus, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the worker pool size
pub const MAX_WORKERS: u32 = 4;

/// What a batch does: reconcile raw records, or apply confirmed matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Match,
    Apply,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Match => "match",
            BatchKind::Apply => "apply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "match" => Some(BatchKind::Match),
            "apply" => Some(BatchKind::Apply),
            _ => None,
        }
    }
}

/// Lifecycle state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Running => "RUNNING",
            BatchState::Completed => "COMPLETED",
            BatchState::Failed => "FAILED",
            BatchState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(BatchState::Running),
            "COMPLETED" => Some(BatchState::Completed),
            "FAILED" => Some(BatchState::Failed),
            "CANCELLED" => Some(BatchState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Running)
    }
}

/// Driver parameters, all optional on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchParameters {
    /// Target statuses to claim (match batches; e.g. re-attempt
    /// ["ERROR", "AMBIGUOUS", "NOT_FOUND"])
    #[serde(default = "default_statuses")]
    pub statuses: Vec<MatchStatus>,

    /// Restrict the batch to one source
    #[serde(default)]
    pub source: Option<SourceKind>,

    /// Maximum records processed by this batch
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Records claimed per page pull
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Concurrent workers (1 to MAX_WORKERS)
    #[serde(default = "default_workers")]
    pub workers: u32,
}

fn default_statuses() -> Vec<MatchStatus> {
    vec![MatchStatus::Pending]
}

fn default_limit() -> u32 {
    100
}

fn default_page_size() -> u32 {
    25
}

fn default_workers() -> u32 {
    2
}

impl Default for BatchParameters {
    fn default() -> Self {
        Self {
            statuses: default_statuses(),
            source: None,
            limit: default_limit(),
            page_size: default_page_size(),
            workers: default_workers(),
        }
    }
}

impl BatchParameters {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(format!("workers must be between 1 and {}", MAX_WORKERS));
        }
        if self.limit == 0 {
            return Err("limit must be at least 1".to_string());
        }
        if self.page_size == 0 {
            return Err("page_size must be at least 1".to_string());
        }
        if self.statuses.is_empty() {
            return Err("statuses must not be empty".to_string());
        }
        Ok(())
    }

    /// Apply batches only ever consume MATCHED records
    pub fn normalized_for(mut self, kind: BatchKind) -> Self {
        if kind == BatchKind::Apply {
            self.statuses = vec![MatchStatus::Matched];
        }
        self
    }
}

/// Counts per outcome, reported in batch summaries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchTally {
    #[serde(default)]
    pub matched: u32,
    #[serde(default)]
    pub ambiguous: u32,
    #[serde(default)]
    pub not_found: u32,
    #[serde(default)]
    pub applied: u32,
    #[serde(default)]
    pub error: u32,
    /// No-op outcomes (already applied, claim lost)
    #[serde(default)]
    pub skipped: u32,
}

impl BatchTally {
    pub fn record(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Matched => self.matched += 1,
            MatchStatus::Ambiguous => self.ambiguous += 1,
            MatchStatus::NotFound => self.not_found += 1,
            MatchStatus::Applied => self.applied += 1,
            MatchStatus::Error => self.error += 1,
            MatchStatus::Pending => self.skipped += 1,
        }
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn total(&self) -> u32 {
        self.matched + self.ambiguous + self.not_found + self.applied + self.error + self.skipped
    }
}

/// One batch driver invocation (in-memory + persisted shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileBatch {
    pub batch_id: Uuid,
    pub kind: BatchKind,
    pub state: BatchState,
    pub parameters: BatchParameters,
    pub processed: u32,
    pub tally: BatchTally,
    /// Driver-level failure message, if any
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReconcileBatch {
    pub fn new(kind: BatchKind, parameters: BatchParameters) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            kind,
            state: BatchState::Running,
            parameters: parameters.normalized_for(kind),
            processed: 0,
            tally: BatchTally::default(),
            message: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to a terminal state, stamping the end time
    pub fn finish(&mut self, state: BatchState, message: Option<String>) {
        self.state = state;
        self.message = message;
        if state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }
}
