// src/extractor/canonical.rs
// Canonicalization of evidence text into a dedup key.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_CANON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NEGATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(not|never|cannot|can't|without|avoid|against|reject)\b").unwrap()
});

/// Lowercases, strips non-`[a-z0-9\s-]` characters, collapses whitespace,
/// trims, and truncates to 180 characters.
pub fn canonicalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_CANON_RE.replace_all(&lower, " ");
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ");
    let trimmed = collapsed.trim();
    trimmed.chars().take(180).collect()
}

/// True if `text` contains a negation marker.
pub fn has_negation(text: &str) -> bool {
    NEGATION_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        let out = canonicalize("We Will  Adopt, Optimistic Locking!!!");
        assert_eq!(out, "we will adopt optimistic locking");
    }

    #[test]
    fn truncates_to_180_chars() {
        let long = "a".repeat(300);
        let out = canonicalize(&long);
        assert_eq!(out.chars().count(), 180);
    }

    #[test]
    fn detects_negation() {
        assert!(has_negation("we will not adopt optimistic locking"));
        assert!(has_negation("we cannot do this"));
        assert!(!has_negation("we will adopt optimistic locking"));
    }

    #[test]
    fn is_idempotent() {
        let once = canonicalize("Hello, World! This Is A Test.");
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }
}
