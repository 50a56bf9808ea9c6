//! Candidate scoring and ranking
//!
//! Pure functions: exact normalized title match (localized or original)
//! scores 5, substring containment in either direction scores 2 (exact
//! supersedes substring), a release date whose first four characters equal
//! the query year adds 3. Ranking is a stable descending sort so tied
//! candidates keep catalog order.

use crate::services::catalog::MovieCandidate;
use crate::services::normalizer::normalize;

/// Points for an exact normalized title match
const TITLE_EXACT: i32 = 5;
/// Points for substring containment in either direction
const TITLE_SUBSTRING: i32 = 2;
/// Points for a release year equal to the query year
const YEAR_MATCH: i32 = 3;

/// One candidate with its computed score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: MovieCandidate,
    pub score: i32,
}

/// Score one candidate against the normalized query title and year
pub fn score_candidate(
    query_title: &str,
    query_year: Option<i32>,
    candidate: &MovieCandidate,
) -> i32 {
    let localized = normalize(&candidate.title).title;
    let original = normalize(&candidate.original_title).title;

    let mut score = title_score(query_title, &localized, &original);

    if let (Some(year), Some(date)) = (query_year, candidate.release_date.as_deref()) {
        let year_str = year.to_string();
        if date.get(..4) == Some(year_str.as_str()) {
            score += YEAR_MATCH;
        }
    }

    score
}

/// The title rules are alternatives; the strongest one that fires wins
fn title_score(query: &str, localized: &str, original: &str) -> i32 {
    if query.is_empty() {
        return 0;
    }
    if query == localized || (!original.is_empty() && query == original) {
        return TITLE_EXACT;
    }
    let contains = |candidate: &str| {
        !candidate.is_empty() && (candidate.contains(query) || query.contains(candidate))
    };
    if contains(localized) || contains(original) {
        return TITLE_SUBSTRING;
    }
    0
}

/// Score and rank candidates, descending, catalog order preserved on ties
pub fn rank(
    query_title: &str,
    query_year: Option<i32>,
    candidates: Vec<MovieCandidate>,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let score = score_candidate(query_title, query_year, &candidate);
            ScoredCandidate { candidate, score }
        })
        .collect();
    // Stable sort keeps catalog order within equal scores
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

/// A result set is ambiguous iff the top two scores are equal and at least
/// two candidates exist
pub fn is_ambiguous(ranked: &[ScoredCandidate]) -> bool {
    ranked.len() >= 2 && ranked[0].score == ranked[1].score
}

/// Ids of every candidate sharing the top score
pub fn tied_leader_ids(ranked: &[ScoredCandidate]) -> Vec<i64> {
    let top = match ranked.first() {
        Some(first) => first.score,
        None => return Vec::new(),
    };
    ranked
        .iter()
        .take_while(|scored| scored.score == top)
        .map(|scored| scored.candidate.id)
        .collect()
}
