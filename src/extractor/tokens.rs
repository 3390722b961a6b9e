// src/extractor/tokens.rs
// Deterministic token extraction and scoring.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::stopwords::is_stopword;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9][a-z0-9'-]*").unwrap());

/// A scored token with its occurrence count within the input text.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredToken {
    pub token: String,
    pub occurrences: u32,
    pub weight: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Normalizes a raw regex match into a candidate token, or `None` if it
/// should be rejected (too short, pure-digit, or a stop word).
fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim_matches('\'');
    if trimmed.len() < 3 {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if is_stopword(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Extracts up to 24 highest-weight tokens from `text`, lowercased first.
///
/// `weight = occurrences * (1 + min(len,12)/12)`, rounded to 4 decimals.
pub fn extract_tokens(text: &str) -> Vec<ScoredToken> {
    let lower = text.to_lowercase();
    let mut counts: HashMap<String, u32> = HashMap::new();

    for m in TOKEN_RE.find_iter(&lower) {
        if let Some(tok) = normalize(m.as_str()) {
            *counts.entry(tok).or_insert(0) += 1;
        }
    }

    let mut scored: Vec<ScoredToken> = counts
        .into_iter()
        .map(|(token, occurrences)| {
            let len = token.len().min(12) as f64;
            let weight = round4(occurrences as f64 * (1.0 + len / 12.0));
            ScoredToken {
                token,
                occurrences,
                weight,
            }
        })
        .collect();

    // Highest weight first; break ties by token for determinism.
    scored.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap()
            .then_with(|| a.token.cmp(&b.token))
    });
    scored.truncate(24);
    scored
}

/// A token row after per-ingest deduping across multiple messages, carrying
/// the turn it was last seen on.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupedToken {
    pub token: String,
    pub occurrences: u32,
    pub weight: f64,
    pub last_turn: i64,
}

/// Groups tokens extracted across several messages by token, summing
/// occurrences/weight and tracking the max turn seen.
pub fn dedupe_tokens(per_message: &[(i64, Vec<ScoredToken>)]) -> Vec<DedupedToken> {
    let mut merged: HashMap<String, DedupedToken> = HashMap::new();

    for (turn, tokens) in per_message {
        for t in tokens {
            merged
                .entry(t.token.clone())
                .and_modify(|e| {
                    e.occurrences += t.occurrences;
                    e.weight = round4(e.weight + t.weight);
                    e.last_turn = e.last_turn.max(*turn);
                })
                .or_insert_with(|| DedupedToken {
                    token: t.token.clone(),
                    occurrences: t.occurrences,
                    weight: t.weight,
                    last_turn: *turn,
                });
        }
    }

    let mut out: Vec<DedupedToken> = merged.into_values().collect();
    out.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap()
            .then_with(|| a.token.cmp(&b.token))
    });
    out
}
