// src/memory/conflict.rs
// Conflict ledger: pairwise contradiction detection among top semantic
// items of type decision/constraint/definition.

use std::collections::{HashMap, HashSet};

use crate::extractor::{content_tokens, has_negation};
use crate::store::{ConflictEntryRow, SemanticItemRow};

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn truncate_evidence(text: &str) -> String {
    text.chars().take(180).collect()
}

/// Scans the top 70 decision/constraint/definition items for pairwise
/// shared-token, negation-mismatched contradictions, dedupes by
/// `issue_key`, and returns the top 80 by `(confidence desc, last_turn
/// desc)`. `items` must already be sorted by the caller's weight-desc
/// order (the Store's native ordering) since pair naming is order-stable
/// but not otherwise significant.
pub fn detect_conflicts(items: &[SemanticItemRow]) -> Vec<ConflictEntryRow> {
    let candidates: Vec<&SemanticItemRow> = items
        .iter()
        .filter(|i| matches!(i.item_type.as_str(), "decision" | "constraint" | "definition"))
        .take(70)
        .collect();

    let mut merged: HashMap<String, ConflictEntryRow> = HashMap::new();

    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let a = candidates[i];
            let b = candidates[j];

            let ta: HashSet<&str> = content_tokens(&a.canonical_text).into_iter().collect();
            let tb: HashSet<&str> = content_tokens(&b.canonical_text).into_iter().collect();
            let mut shared: Vec<&str> = ta.intersection(&tb).copied().collect();
            if shared.len() < 3 {
                continue;
            }

            let neg_a = has_negation(&a.evidence_text);
            let neg_b = has_negation(&b.evidence_text);
            if neg_a == neg_b {
                continue;
            }

            shared.sort_unstable();
            let key_tokens = shared.iter().take(6).copied().collect::<Vec<_>>().join("-");
            let mut issue_key = format!("{}|{}|{}", a.item_type, b.item_type, key_tokens);
            issue_key.truncate(220);

            let confidence = round4(
                (0.46 + shared.len() as f64 * 0.07 + a.confidence.max(b.confidence) * 0.2).min(0.96),
            );
            let first_turn = a.first_turn.min(b.first_turn);
            let last_turn = a.last_turn.max(b.last_turn);

            merged
                .entry(issue_key.clone())
                .and_modify(|e| {
                    e.confidence = e.confidence.max(confidence);
                    e.last_turn = e.last_turn.max(last_turn);
                    e.occurrences += 1;
                })
                .or_insert_with(|| ConflictEntryRow {
                    issue_key,
                    item_a: truncate_evidence(&a.evidence_text),
                    item_b: truncate_evidence(&b.evidence_text),
                    confidence,
                    status: "open".to_string(),
                    first_turn,
                    last_turn,
                    occurrences: 1,
                });
        }
    }

    let mut out: Vec<ConflictEntryRow> = merged.into_values().collect();
    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap()
            .then_with(|| b.last_turn.cmp(&a.last_turn))
    });
    out.truncate(80);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_type: &str, canonical: &str, evidence: &str, confidence: f64) -> SemanticItemRow {
        SemanticItemRow {
            item_type: item_type.to_string(),
            canonical_text: canonical.to_string(),
            evidence_text: evidence.to_string(),
            weight: 2.0,
            confidence,
            occurrences: 1,
            first_turn: 1,
            last_turn: 1,
            status: "active".to_string(),
        }
    }

    #[test]
    fn detects_negation_mismatch_pair() {
        let items = vec![
            item(
                "decision",
                "we will adopt optimistic locking for the database",
                "We will adopt optimistic locking for the database.",
                0.7,
            ),
            item(
                "decision",
                "we will not adopt optimistic locking for the database",
                "We will not adopt optimistic locking for the database.",
                0.7,
            ),
        ];

        let conflicts = detect_conflicts(&items);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].confidence >= 0.70);
        assert!(conflicts[0].confidence <= 0.96);
        assert!(conflicts[0].issue_key.starts_with("decision|decision|"));
    }

    #[test]
    fn no_conflict_without_negation_mismatch() {
        let items = vec![
            item(
                "decision",
                "we will adopt optimistic locking for the database",
                "We will adopt optimistic locking for the database.",
                0.7,
            ),
            item(
                "decision",
                "we will adopt optimistic locking for the cache layer",
                "We will adopt optimistic locking for the cache layer.",
                0.7,
            ),
        ];
        assert!(detect_conflicts(&items).is_empty());
    }

    #[test]
    fn no_conflict_below_shared_token_threshold() {
        let items = vec![
            item("decision", "we will adopt locking", "We will adopt locking.", 0.7),
            item("decision", "we will not migrate billing", "We will not migrate billing.", 0.7),
        ];
        assert!(detect_conflicts(&items).is_empty());
    }
}
