//! Per-record resolution pipeline
//!
//! Normalize → search → score → (tie) director disambiguation. The matcher
//! only decides; persisting the outcome is the batch runner's job, so this
//! stays testable against a stubbed catalog.

use crate::models::record::ImportRecord;
use crate::models::MatchStatus;
use crate::services::catalog::{CatalogError, MovieCatalog};
use crate::services::normalizer::{normalize, normalize_person, simplify};
use crate::services::scorer::{is_ambiguous, rank, tied_leader_ids};
use std::sync::Arc;
use tracing::debug;

/// Tied candidates whose credits are fetched during disambiguation
pub const DISAMBIGUATION_CANDIDATES: usize = 3;

/// Outcome of resolving one record (not yet persisted)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    Matched {
        external_id: i64,
        note: String,
    },
    /// Tie the engine could not break; `external_id` is the provisional
    /// top-ranked candidate, `tied` the full tie set
    Ambiguous {
        external_id: i64,
        tied: Vec<i64>,
        note: String,
    },
    NotFound {
        note: String,
    },
}

impl MatchDecision {
    pub fn status(&self) -> MatchStatus {
        match self {
            MatchDecision::Matched { .. } => MatchStatus::Matched,
            MatchDecision::Ambiguous { .. } => MatchStatus::Ambiguous,
            MatchDecision::NotFound { .. } => MatchStatus::NotFound,
        }
    }

    pub fn external_id(&self) -> Option<i64> {
        match self {
            MatchDecision::Matched { external_id, .. }
            | MatchDecision::Ambiguous { external_id, .. } => Some(*external_id),
            MatchDecision::NotFound { .. } => None,
        }
    }

    pub fn note(&self) -> &str {
        match self {
            MatchDecision::Matched { note, .. }
            | MatchDecision::Ambiguous { note, .. }
            | MatchDecision::NotFound { note } => note,
        }
    }
}

/// Resolves raw records against the external catalog
pub struct RecordMatcher {
    catalog: Arc<dyn MovieCatalog>,
}

impl RecordMatcher {
    pub fn new(catalog: Arc<dyn MovieCatalog>) -> Self {
        Self { catalog }
    }

    /// Run the resolution algorithm for one record.
    ///
    /// Catalog failures bubble up; the caller converts them into the
    /// record's ERROR transition.
    pub async fn resolve(&self, record: &ImportRecord) -> Result<MatchDecision, CatalogError> {
        let normalized = normalize(&record.raw_title);
        if normalized.title.is_empty() {
            return Ok(MatchDecision::NotFound {
                note: "empty title".to_string(),
            });
        }

        let year = record.raw_year.or(normalized.year);

        let mut candidates = self.catalog.search_movies(&normalized.title, year).await?;

        // Fallback: one retry with the simplified keyword query, without the
        // year filter (recall over precision once the primary query missed)
        let mut fallback_query: Option<String> = None;
        if candidates.is_empty() {
            let simplified = simplify(&record.raw_title);
            if !simplified.is_empty() && simplified != normalized.title {
                debug!(
                    record_id = record.record_id,
                    query = %simplified,
                    "Primary query empty, retrying with simplified keywords"
                );
                candidates = self.catalog.search_movies(&simplified, None).await?;
                if candidates.is_empty() {
                    return Ok(MatchDecision::NotFound {
                        note: format!("no result | q={}", simplified),
                    });
                }
                fallback_query = Some(simplified);
            } else {
                return Ok(MatchDecision::NotFound {
                    note: format!("no result | q={}", normalized.title),
                });
            }
        }

        let ranked = rank(&normalized.title, year, candidates);

        if ranked.len() == 1 {
            return Ok(MatchDecision::Matched {
                external_id: ranked[0].candidate.id,
                note: with_query_suffix("single result".to_string(), &fallback_query),
            });
        }

        let top_score = ranked[0].score;

        if !is_ambiguous(&ranked) {
            return Ok(MatchDecision::Matched {
                external_id: ranked[0].candidate.id,
                note: with_query_suffix(format!("score={}", top_score), &fallback_query),
            });
        }

        let tied = tied_leader_ids(&ranked);

        // Tie-break on the director hint, fetching credits lazily and
        // stopping on the first overlap
        let hint = record
            .raw_director_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());
        if let Some(hint) = hint {
            let hint_normalized = normalize_person(hint);
            for external_id in tied.iter().take(DISAMBIGUATION_CANDIDATES) {
                let directors = self.catalog.movie_directors(*external_id).await?;
                if directors
                    .iter()
                    .any(|name| person_overlap(&hint_normalized, &normalize_person(name)))
                {
                    debug!(
                        record_id = record.record_id,
                        external_id = external_id,
                        "Tie broken by director hint"
                    );
                    return Ok(MatchDecision::Matched {
                        external_id: *external_id,
                        note: with_query_suffix(
                            format!("score={} | director_match", top_score),
                            &fallback_query,
                        ),
                    });
                }
            }
        }

        let id_list = tied
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Ok(MatchDecision::Ambiguous {
            external_id: tied[0],
            note: with_query_suffix(
                format!("ambiguous | score={} | candidates={}", top_score, id_list),
                &fallback_query,
            ),
            tied,
        })
    }
}

/// Substring-level overlap between two already-normalized names
fn person_overlap(hint: &str, director: &str) -> bool {
    !hint.is_empty() && !director.is_empty() && (hint.contains(director) || director.contains(hint))
}

fn with_query_suffix(note: String, fallback_query: &Option<String>) -> String {
    match fallback_query {
        Some(query) => format!("{} | q={}", note, query),
        None => note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::SourceKind;
    use crate::services::catalog::MovieCandidate;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted catalog: queued search responses, fixed director sets
    struct StubCatalog {
        searches: Mutex<VecDeque<Vec<MovieCandidate>>>,
        directors: HashMap<i64, Vec<String>>,
        search_calls: AtomicU32,
        credits_calls: AtomicU32,
    }

    impl StubCatalog {
        fn new(searches: Vec<Vec<MovieCandidate>>) -> Self {
            Self {
                searches: Mutex::new(searches.into()),
                directors: HashMap::new(),
                search_calls: AtomicU32::new(0),
                credits_calls: AtomicU32::new(0),
            }
        }

        fn with_directors(mut self, id: i64, names: &[&str]) -> Self {
            self.directors
                .insert(id, names.iter().map(|n| n.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl MovieCatalog for StubCatalog {
        async fn search_movies(
            &self,
            _query: &str,
            _year: Option<i32>,
        ) -> Result<Vec<MovieCandidate>, CatalogError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            let mut searches = self.searches.lock().unwrap();
            searches
                .pop_front()
                .ok_or_else(|| CatalogError::Unavailable("no scripted search".to_string()))
        }

        async fn movie_directors(&self, external_id: i64) -> Result<Vec<String>, CatalogError> {
            self.credits_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.directors.get(&external_id).cloned().unwrap_or_default())
        }

        async fn movie_details(
            &self,
            _external_id: i64,
        ) -> Result<crate::services::catalog::MovieDetails, CatalogError> {
            Err(CatalogError::Unavailable("not scripted".to_string()))
        }
    }

    fn candidate(id: i64, title: &str, date: Option<&str>) -> MovieCandidate {
        MovieCandidate {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            release_date: date.map(|d| d.to_string()),
            popularity: 0.0,
            vote_count: 0,
        }
    }

    fn record(title: &str, year: Option<i32>, hint: Option<&str>) -> ImportRecord {
        ImportRecord {
            record_id: 1,
            source: SourceKind::Disc,
            raw_title: title.to_string(),
            raw_year: year,
            raw_director_hint: hint.map(|h| h.to_string()),
            raw_metadata: None,
            match_status: MatchStatus::Pending,
            external_id: None,
            match_note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_candidate_matches_directly() {
        let stub = StubCatalog::new(vec![vec![candidate(949, "Heat", Some("1995-12-15"))]]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        let decision = matcher.resolve(&record("Heat", Some(1995), None)).await.unwrap();
        assert_eq!(
            decision,
            MatchDecision::Matched {
                external_id: 949,
                note: "single result".to_string()
            }
        );
    }

    #[tokio::test]
    async fn strict_top_score_wins_with_score_note() {
        let stub = StubCatalog::new(vec![vec![
            candidate(10428, "Heat", Some("1986-08-01")),
            candidate(949, "Heat", Some("1995-12-15")),
        ]]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        let decision = matcher.resolve(&record("Heat", Some(1995), None)).await.unwrap();
        assert_eq!(
            decision,
            MatchDecision::Matched {
                external_id: 949,
                note: "score=8".to_string()
            }
        );
    }

    #[tokio::test]
    async fn tie_without_hint_is_ambiguous_with_ids_in_note() {
        let stub = StubCatalog::new(vec![vec![
            candidate(949, "Heat", Some("1995-12-15")),
            candidate(10428, "Heat", Some("1995-06-01")),
        ]]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        let decision = matcher.resolve(&record("Heat", Some(1995), None)).await.unwrap();
        match decision {
            MatchDecision::Ambiguous {
                external_id,
                tied,
                note,
            } => {
                assert_eq!(external_id, 949);
                assert_eq!(tied, vec![949, 10428]);
                assert!(note.contains("candidates=949,10428"), "note: {}", note);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn director_hint_breaks_tie_and_stops_early() {
        let stub = StubCatalog::new(vec![vec![
            candidate(949, "Heat", Some("1995-12-15")),
            candidate(10428, "Heat", Some("1995-06-01")),
        ]])
        .with_directors(949, &["Michael Mann"])
        .with_directors(10428, &["R.M. Richards"]);
        let stub = Arc::new(stub);
        let matcher = RecordMatcher::new(stub.clone());

        let decision = matcher
            .resolve(&record("Heat", Some(1995), Some("Michael Mann")))
            .await
            .unwrap();
        assert_eq!(
            decision,
            MatchDecision::Matched {
                external_id: 949,
                note: "score=8 | director_match".to_string()
            }
        );
        // First candidate already overlapped; no second credits call
        assert_eq!(stub.credits_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn director_comparison_is_accent_insensitive_substring() {
        let stub = StubCatalog::new(vec![vec![
            candidate(1, "Léon", Some("1994-09-14")),
            candidate(2, "Léon", Some("1994-01-01")),
        ]])
        .with_directors(1, &["Luc BESSON"])
        .with_directors(2, &["Someone Else"]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        // Hint is a bare, accent-free surname; match is substring-level
        let decision = matcher
            .resolve(&record("Léon", Some(1994), Some("besson")))
            .await
            .unwrap();
        assert_eq!(decision.external_id(), Some(1));
        assert_eq!(decision.status(), MatchStatus::Matched);
    }

    #[tokio::test]
    async fn credits_fetches_cap_at_three() {
        let stub = StubCatalog::new(vec![vec![
            candidate(1, "Heat", Some("1995-01-01")),
            candidate(2, "Heat", Some("1995-02-01")),
            candidate(3, "Heat", Some("1995-03-01")),
            candidate(4, "Heat", Some("1995-04-01")),
        ]]);
        let stub = Arc::new(stub);
        let matcher = RecordMatcher::new(stub.clone());

        let decision = matcher
            .resolve(&record("Heat", Some(1995), Some("Nobody Known")))
            .await
            .unwrap();
        assert_eq!(decision.status(), MatchStatus::Ambiguous);
        assert_eq!(stub.credits_calls.load(Ordering::SeqCst), 3);
        // All four tied ids still recorded for manual resolution
        assert!(decision.note().contains("candidates=1,2,3,4"));
    }

    #[tokio::test]
    async fn fallback_query_rescues_zero_primary_results() {
        let stub = StubCatalog::new(vec![
            Vec::new(),
            vec![candidate(120, "Le Seigneur des anneaux", Some("2001-12-19"))],
        ]);
        let stub = Arc::new(stub);
        let matcher = RecordMatcher::new(stub.clone());

        let decision = matcher
            .resolve(&record(
                "Le Seigneur des Anneaux: La Communauté de l'Anneau",
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(decision.status(), MatchStatus::Matched);
        assert!(
            decision.note().contains("q=seigneur des anneaux"),
            "note: {}",
            decision.note()
        );
        assert_eq!(stub.search_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_notes_the_query_used() {
        let stub = StubCatalog::new(vec![Vec::new(), Vec::new()]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        let decision = matcher
            .resolve(&record("The Lord of the Rings", None, None))
            .await
            .unwrap();
        assert_eq!(
            decision,
            MatchDecision::NotFound {
                note: "no result | q=lord rings".to_string()
            }
        );
    }

    #[tokio::test]
    async fn identical_simplified_query_skips_fallback() {
        // "heat" simplifies to itself; only one search happens
        let stub = StubCatalog::new(vec![Vec::new()]);
        let stub = Arc::new(stub);
        let matcher = RecordMatcher::new(stub.clone());

        let decision = matcher.resolve(&record("Heat", None, None)).await.unwrap();
        assert_eq!(decision.status(), MatchStatus::NotFound);
        assert_eq!(stub.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_title_never_reaches_the_catalog() {
        let stub = StubCatalog::new(Vec::new());
        let stub = Arc::new(stub);
        let matcher = RecordMatcher::new(stub.clone());

        let decision = matcher.resolve(&record("[BR] [4K]", None, None)).await.unwrap();
        assert_eq!(
            decision,
            MatchDecision::NotFound {
                note: "empty title".to_string()
            }
        );
        assert_eq!(stub.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn embedded_year_feeds_the_search_and_scorer() {
        let stub = StubCatalog::new(vec![vec![
            candidate(10428, "Heat", Some("1986-08-01")),
            candidate(949, "Heat", Some("1995-12-15")),
        ]]);
        let matcher = RecordMatcher::new(Arc::new(stub));

        // Year comes from the trailing parenthesis, not the record column
        let decision = matcher.resolve(&record("Heat (1995)", None, None)).await.unwrap();
        assert_eq!(decision.external_id(), Some(949));
    }

    #[tokio::test]
    async fn catalog_failure_propagates() {
        // Stub queue empty: the first search errors
        let stub = StubCatalog::new(Vec::new());
        let matcher = RecordMatcher::new(Arc::new(stub));

        let result = matcher.resolve(&record("Heat", Some(1995), None)).await;
        assert!(matches!(result, Err(CatalogError::Unavailable(_))));
    }
}
