//! Reconciliation record and its state machine
//!
//! Each raw input row moves through:
//! PENDING → {MATCHED, AMBIGUOUS, NOT_FOUND, ERROR}, then
//! AMBIGUOUS → {MATCHED, NOT_FOUND} (manual resolution),
//! MATCHED → APPLIED (apply pass) or → ERROR (apply failure).
//! Any non-PENDING state can be explicitly re-entered into PENDING.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Segment separator inside `match_note`
pub const NOTE_SEPARATOR: &str = " | ";

/// Idempotency marker appended to `match_note` by the apply pass
pub const APPLIED_MARKER: &str = "applied";

/// Segment appended by an explicit reset; invalidates earlier markers
pub const RESET_MARKER: &str = "reset";

/// Maximum bytes of diagnostic text appended to `match_note` per failure
pub const ERROR_NOTE_MAX: usize = 900;

/// Match status of one reconciliation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Awaiting reconciliation
    Pending,
    /// Resolved to exactly one external catalog id
    Matched,
    /// Tied candidates; needs manual resolution
    Ambiguous,
    /// No acceptable candidate found
    NotFound,
    /// Reconciliation or apply failed; eligible for retry
    Error,
    /// Match materialized into the canonical store
    Applied,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "PENDING",
            MatchStatus::Matched => "MATCHED",
            MatchStatus::Ambiguous => "AMBIGUOUS",
            MatchStatus::NotFound => "NOT_FOUND",
            MatchStatus::Error => "ERROR",
            MatchStatus::Applied => "APPLIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MatchStatus::Pending),
            "MATCHED" => Some(MatchStatus::Matched),
            "AMBIGUOUS" => Some(MatchStatus::Ambiguous),
            "NOT_FOUND" => Some(MatchStatus::NotFound),
            "ERROR" => Some(MatchStatus::Error),
            "APPLIED" => Some(MatchStatus::Applied),
            _ => None,
        }
    }

    /// Whether the state machine allows `self → to`
    ///
    /// Re-entering PENDING from any other state is the explicit
    /// reset/reprocess path and is always allowed.
    pub fn can_transition(self, to: MatchStatus) -> bool {
        use MatchStatus::*;
        match (self, to) {
            (Pending, Matched) | (Pending, Ambiguous) | (Pending, NotFound) | (Pending, Error) => {
                true
            }
            (Matched, Applied) | (Matched, Error) => true,
            (Ambiguous, Matched) | (Ambiguous, NotFound) => true,
            (from, Pending) if from != Pending => true,
            _ => false,
        }
    }

    /// Terminal unless explicitly reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::NotFound | MatchStatus::Applied)
    }

    /// States that must carry a resolved external catalog id
    pub fn requires_external_id(&self) -> bool {
        matches!(
            self,
            MatchStatus::Matched | MatchStatus::Ambiguous | MatchStatus::Applied
        )
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a raw record; selects the apply-time payload adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Physical discs (Blu-ray / 4K / DVD shelf inventory)
    Disc,
    /// Files on the NAS library share
    Nas,
    /// "Seen" history exported from a third-party tracker
    Seen,
    /// Watchlist exported from a third-party tracker
    Watchlist,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Disc => "disc",
            SourceKind::Nas => "nas",
            SourceKind::Seen => "seen",
            SourceKind::Watchlist => "watchlist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disc" => Some(SourceKind::Disc),
            "nas" => Some(SourceKind::Nas),
            "seen" => Some(SourceKind::Seen),
            "watchlist" => Some(SourceKind::Watchlist),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Disc => "Physical discs",
            SourceKind::Nas => "NAS library",
            SourceKind::Seen => "Seen history",
            SourceKind::Watchlist => "Watchlist",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted reconciliation record
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub record_id: i64,
    pub source: SourceKind,
    pub raw_title: String,
    pub raw_year: Option<i32>,
    pub raw_director_hint: Option<String>,
    /// Source-specific payload, opaque to the engine (JSON text)
    pub raw_metadata: Option<String>,
    pub match_status: MatchStatus,
    pub external_id: Option<i64>,
    /// Append-only audit trail of scoring decisions and errors
    pub match_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportRecord {
    /// Idempotency check used by the apply pass
    ///
    /// Only an `applied` segment after the most recent `reset` counts; an
    /// explicit reset invalidates earlier apply passes without rewriting
    /// the audit trail.
    pub fn is_marked_applied(&self) -> bool {
        let note = match self.match_note.as_deref() {
            Some(n) => n,
            None => return false,
        };
        let mut applied = false;
        for segment in note.split(NOTE_SEPARATOR) {
            match segment.trim() {
                APPLIED_MARKER => applied = true,
                RESET_MARKER => applied = false,
                _ => {}
            }
        }
        applied
    }

    /// Tied candidate ids recorded by an AMBIGUOUS outcome
    /// (`candidates=id1,id2,...` segment of the note)
    pub fn tied_candidate_ids(&self) -> Vec<i64> {
        let note = match self.match_note.as_deref() {
            Some(n) => n,
            None => return Vec::new(),
        };
        for segment in note.split(NOTE_SEPARATOR) {
            if let Some(ids) = segment.trim().strip_prefix("candidates=") {
                return ids
                    .split(',')
                    .filter_map(|id| id.trim().parse::<i64>().ok())
                    .collect();
            }
        }
        Vec::new()
    }
}

/// Intake shape for new records (importers are external collaborators)
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecord {
    pub source: SourceKind,
    pub raw_title: String,
    #[serde(default)]
    pub raw_year: Option<i32>,
    #[serde(default)]
    pub raw_director_hint: Option<String>,
    #[serde(default)]
    pub raw_metadata: Option<serde_json::Value>,
}

/// Truncate diagnostic text so repeated failures cannot grow the note
/// without bound; cuts on a char boundary.
pub fn truncate_note_text(text: &str) -> String {
    if text.len() <= ERROR_NOTE_MAX {
        return text.to_string();
    }
    let mut end = ERROR_NOTE_MAX;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
