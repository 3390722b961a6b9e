// src/extractor/sentences.rs
// Sentence splitting and semantic classification.

use once_cell::sync::Lazy;
use regex::Regex;

/// The five semantic item types, in the priority order classification
/// checks them. Do not reorder — a sentence with both a `?` and a decision
/// verb classifies as `open_question` because it is checked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    OpenQuestion,
    Hypothesis,
    Decision,
    Constraint,
    Definition,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::OpenQuestion => "open_question",
            ItemType::Hypothesis => "hypothesis",
            ItemType::Decision => "decision",
            ItemType::Constraint => "constraint",
            ItemType::Definition => "definition",
        }
    }

    /// Base confidence assigned at classification time, before density
    /// adjustment (see `score_semantic`).
    fn base_confidence(&self) -> f64 {
        match self {
            ItemType::OpenQuestion => 0.62,
            ItemType::Hypothesis => 0.67,
            ItemType::Decision => 0.68,
            ItemType::Constraint => 0.66,
            ItemType::Definition => 0.64,
        }
    }

    /// Initial status assigned at classification time.
    pub fn initial_status(&self) -> &'static str {
        match self {
            ItemType::OpenQuestion => "open",
            _ => "active",
        }
    }
}

static OPEN_QUESTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\?|\b(how|what|why|which|who|where|when)\b").unwrap());
static HYPOTHESIS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(hypothesis|hypothesize|theory|we suspect|we predict|i predict|suggests that)\b")
        .unwrap()
});
static DECISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(we should|we need to|we will|let's|i propose|we agree|decision|decide|agreed)\b",
    )
    .unwrap()
});
static CONSTRAINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(constraint|must|cannot|can't|should not|limit|budget|deadline|latency|security|privacy|compliance)\b",
    )
    .unwrap()
});
static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(define|defined as|means|definition|term)\b").unwrap());

static SENTENCE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());

/// Splits `text` into sentences, keeping only non-empty sentences of
/// length >= 16 characters, capped at 4 per message.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT_RE
        .split(text)
        .map(|s| s.trim().to_string())
        .filter(|s| s.len() >= 16)
        .take(4)
        .collect()
}

/// Classifies a sentence per the fixed priority order. Returns `None` if
/// no rule matches (the sentence is discarded).
pub fn classify(sentence: &str) -> Option<ItemType> {
    if OPEN_QUESTION_RE.is_match(sentence) {
        return Some(ItemType::OpenQuestion);
    }
    if HYPOTHESIS_RE.is_match(sentence) {
        return Some(ItemType::Hypothesis);
    }
    if DECISION_RE.is_match(sentence) {
        return Some(ItemType::Decision);
    }
    if CONSTRAINT_RE.is_match(sentence) {
        return Some(ItemType::Constraint);
    }
    if DEFINITION_RE.is_match(sentence) {
        return Some(ItemType::Definition);
    }
    None
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// `(weight, confidence)` for a classified sentence per §4.2's semantic
/// scoring formula.
pub fn score_semantic(item_type: ItemType, sentence: &str) -> (f64, f64) {
    let tokens = sentence.split_whitespace().count();
    let density = (tokens.min(24) as f64) / 16.0;
    let weight = round4(1.0 + density);
    let confidence = round4((item_type.base_confidence() + density * 0.05).min(0.95));
    (weight, confidence)
}
