// src/extractor/mod.rs
// Pure, deterministic text analysis: tokenization, sentence classification,
// canonicalization. No I/O, no logging — this is the spine of the test
// suite and must be byte-identical for identical input.

pub mod canonical;
pub mod sentences;
pub mod stopwords;
pub mod tokens;

use std::collections::HashMap;

pub use canonical::{canonicalize, has_negation};
pub use sentences::{classify, score_semantic, split_sentences, ItemType};
pub use tokens::{dedupe_tokens, extract_tokens, DedupedToken, ScoredToken};

/// A semantic candidate extracted from one sentence of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticCandidate {
    pub item_type: ItemType,
    pub canonical_text: String,
    pub evidence_text: String,
    pub weight: f64,
    pub confidence: f64,
    pub turn: i64,
}

/// Extracts classified semantic candidates from one message's text.
pub fn extract_semantic_candidates(text: &str, turn: i64) -> Vec<SemanticCandidate> {
    split_sentences(text)
        .into_iter()
        .filter_map(|sentence| {
            let item_type = classify(&sentence)?;
            let (weight, confidence) = score_semantic(item_type, &sentence);
            Some(SemanticCandidate {
                item_type,
                canonical_text: canonicalize(&sentence),
                evidence_text: sentence,
                weight,
                confidence,
                turn,
            })
        })
        .collect()
}

/// A semantic item after per-ingest deduping by `(item_type, canonical_text)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupedSemantic {
    pub item_type: ItemType,
    pub canonical_text: String,
    pub evidence_text: String,
    pub weight: f64,
    pub confidence: f64,
    pub occurrences: u32,
    pub first_turn: i64,
    pub last_turn: i64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Groups semantic candidates by `(item_type, canonical_text)`, summing
/// weight/occurrences, taking max confidence/last_turn, min first_turn, and
/// letting the last-seen evidence text win.
pub fn dedupe_semantic(candidates: Vec<SemanticCandidate>) -> Vec<DedupedSemantic> {
    let mut merged: HashMap<(&'static str, String), DedupedSemantic> = HashMap::new();

    for c in candidates {
        let key = (c.item_type.as_str(), c.canonical_text.clone());
        merged
            .entry(key)
            .and_modify(|e| {
                e.weight = round4(e.weight + c.weight);
                e.occurrences += 1;
                e.confidence = e.confidence.max(c.confidence);
                e.first_turn = e.first_turn.min(c.turn);
                e.last_turn = e.last_turn.max(c.turn);
                e.evidence_text = c.evidence_text.clone();
            })
            .or_insert_with(|| DedupedSemantic {
                item_type: c.item_type,
                canonical_text: c.canonical_text.clone(),
                evidence_text: c.evidence_text.clone(),
                weight: c.weight,
                confidence: c.confidence,
                occurrences: 1,
                first_turn: c.turn,
                last_turn: c.turn,
            });
    }

    merged.into_values().collect()
}

/// Tokenizes canonical text for content comparison (conflict detection):
/// split on whitespace, keep tokens of length >= 4 that are not stop words.
pub fn content_tokens(canonical_text: &str) -> Vec<&str> {
    canonical_text
        .split_whitespace()
        .filter(|t| t.len() >= 4 && !stopwords::is_stopword(t))
        .collect()
}

/// Tokenizes text for Jaccard similarity: alphanumeric runs of length > 2,
/// lowercased, ignoring non-alphanumeric characters entirely.
pub fn jaccard_tokens(text: &str) -> std::collections::HashSet<String> {
    let lower = text.to_lowercase();
    let mut tokens = std::collections::HashSet::new();
    let mut current = String::new();
    for ch in lower.chars() {
        if ch.is_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            if current.len() > 2 {
                tokens.insert(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() > 2 {
        tokens.insert(current);
    }
    tokens
}

/// Jaccard similarity between the token sets of `a` and `b`, using the same
/// tokenization rule as the quality guard. Symmetric, in `[0,1]`.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = jaccard_tokens(a);
    let tb = jaccard_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_is_symmetric_and_bounded() {
        let a = "we will adopt optimistic locking for the database";
        let b = "we will not adopt optimistic locking for the cache";
        let ab = jaccard(a, b);
        let ba = jaccard(b, a);
        assert!((ab - ba).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn jaccard_identical_is_one() {
        let text = "repeating the exact same paragraph verbatim here";
        assert!((jaccard(text, text) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dedupe_semantic_accumulates() {
        let a = extract_semantic_candidates("We will adopt optimistic locking for the service.", 1);
        let b = extract_semantic_candidates("We will adopt optimistic locking for the service.", 2);
        let mut all = a;
        all.extend(b);
        let deduped = dedupe_semantic(all);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].occurrences, 2);
        assert_eq!(deduped[0].first_turn, 1);
        assert_eq!(deduped[0].last_turn, 2);
    }

    #[test]
    fn content_tokens_filters_short_and_stopwords() {
        let toks = content_tokens("we will adopt optimistic locking for the database");
        assert!(!toks.contains(&"the"));
        assert!(!toks.contains(&"for"));
        assert!(toks.contains(&"adopt"));
        assert!(toks.contains(&"optimistic"));
    }
}
