//! Title and name normalization
//!
//! Raw titles arrive noisy: shelf inventories carry format annotations
//! ("Heat [BR] [VF]"), NAS file names embed years, exports mix French and
//! English articles and accents. Everything here is pure and deterministic;
//! the matcher composes these transforms, nothing else in the crate should
//! lowercase or strip titles on its own.

/// Articles dropped by the fallback keyword query (French and English)
const STOP_WORDS: [&str; 9] = ["le", "la", "les", "un", "une", "the", "a", "an", "of"];

/// Maximum keywords kept by [`simplify`]
const MAX_KEYWORDS: usize = 5;

/// A normalized search query: flattened title plus any year that was
/// embedded in a trailing parenthesis of the raw title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTitle {
    pub title: String,
    pub year: Option<i32>,
}

/// Normalize a raw title for search and comparison.
///
/// Removes bracketed annotations, extracts a trailing `(YYYY)` year,
/// case-folds, folds Latin accents, strips punctuation and collapses
/// whitespace. Idempotent on its own output.
pub fn normalize(raw: &str) -> NormalizedTitle {
    let stripped = strip_brackets(raw);
    let (stripped, year) = extract_trailing_year(&stripped);
    NormalizedTitle {
        title: flatten(&stripped),
        year,
    }
}

/// Fallback keyword query: bracket-stripped title truncated at the first
/// colon/dash, flattened, stop words removed, at most five leading
/// keywords. Used only when the primary query returns zero candidates.
pub fn simplify(raw: &str) -> String {
    let stripped = strip_brackets(raw);
    let head = stripped
        .split(&[':', '-', '\u{2013}'][..])
        .next()
        .unwrap_or("");
    flatten(head)
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .take(MAX_KEYWORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a person name for director-hint comparison
/// (case- and accent-insensitive).
pub fn normalize_person(name: &str) -> String {
    flatten(name)
}

/// Remove all `[...]` segments (format/edition annotations). Nested or
/// unbalanced brackets never leak bracket characters into the output.
fn strip_brackets(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth: u32 = 0;
    for c in s.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Split off a trailing `(YYYY)` token, returning the remainder and the year
fn extract_trailing_year(s: &str) -> (String, Option<i32>) {
    let trimmed = s.trim_end();
    if !trimmed.ends_with(')') {
        return (s.to_string(), None);
    }
    if let Some(open) = trimmed.rfind('(') {
        let inner = &trimmed[open + 1..trimmed.len() - 1];
        if inner.len() == 4 && inner.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(year) = inner.parse::<i32>() {
                return (trimmed[..open].to_string(), Some(year));
            }
        }
    }
    (s.to_string(), None)
}

/// Case-fold, fold accents, keep alphanumerics, collapse runs of anything
/// else into single spaces.
fn flatten(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.chars() {
        for lc in c.to_lowercase() {
            match fold_accent(lc) {
                Some(folded) => {
                    if pending_space && !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                    out.push_str(folded);
                }
                None if lc.is_alphanumeric() => {
                    if pending_space && !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                    out.push(lc);
                }
                None => pending_space = true,
            }
        }
    }
    out
}

/// Fold the Latin accents that show up in the two working languages
fn fold_accent(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'â' | 'ä' | 'á' | 'ã' | 'å' => "a",
        'ç' => "c",
        'é' | 'è' | 'ê' | 'ë' => "e",
        'î' | 'ï' | 'í' | 'ì' => "i",
        'ô' | 'ö' | 'ó' | 'ò' | 'õ' => "o",
        'ù' | 'û' | 'ü' | 'ú' => "u",
        'ÿ' | 'ý' => "y",
        'ñ' => "n",
        'œ' => "oe",
        'æ' => "ae",
        _ => return None,
    };
    Some(folded)
}
