// src/memory/summarize.rs
// LLM-backed summarization with a deterministic local fallback, used by
// both micro summarization (over raw messages) and tier compaction
// (over lower-tier summary text).

use std::time::Duration;

use tracing::warn;

use crate::extractor::extract_tokens;
use crate::llm::{GenerationRequest, Generator, Message as LlmMessage};
use crate::store::Message;

fn excerpt(text: &str, words: usize) -> String {
    text.split_whitespace().take(words).collect::<Vec<_>>().join(" ")
}

/// Deterministic summary of a window of raw messages: top lexical terms
/// plus first/mid/last excerpts.
pub fn local_window_summary(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(no content to summarize)".to_string();
    }
    let joined = messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>().join(" ");
    let top: Vec<String> = extract_tokens(&joined)
        .into_iter()
        .take(6)
        .map(|t| t.token)
        .collect();

    let first = &messages[0];
    let mid = &messages[messages.len() / 2];
    let last = &messages[messages.len() - 1];

    format!(
        "Key terms: {}. Opened with \"{}\"; midway, \"{}\"; closed with \"{}\".",
        top.join(", "),
        excerpt(&first.text, 14),
        excerpt(&mid.text, 14),
        excerpt(&last.text, 14),
    )
}

/// Deterministic summary of a group of lower-tier summaries: concatenate
/// and truncate to `max_words`.
pub fn local_tier_summary(parts: &[&str], max_words: usize) -> String {
    let joined = parts.join(" ");
    excerpt(&joined, max_words)
}

/// Summarizes a window of raw messages via `generator`, targeting
/// `max_words`, falling back to `local_window_summary` on any error.
pub async fn summarize_window(
    messages: &[Message],
    generator: &dyn Generator,
    timeout: Duration,
    max_words: usize,
) -> String {
    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker_id, m.text))
        .collect::<Vec<_>>()
        .join("\n");

    let request = GenerationRequest {
        messages: vec![
            LlmMessage::system(format!(
                "You are the Memory Compactor. Summarize the following turns in {} words or fewer, preserving decisions, constraints, and open questions.",
                max_words
            )),
            LlmMessage::user(transcript),
        ],
        temperature: 0.2,
        timeout,
    };

    match generator.generate(request).await {
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            warn!(error = %err, "micro summary generation failed, using local fallback");
            local_window_summary(messages)
        }
    }
}

/// Summarizes a group of lower-tier summary texts via `generator`,
/// targeting `max_words`, falling back to `local_tier_summary`.
pub async fn summarize_tier(
    parts: &[&str],
    generator: &dyn Generator,
    timeout: Duration,
    max_words: usize,
) -> String {
    let joined = parts.join("\n");
    let request = GenerationRequest {
        messages: vec![
            LlmMessage::system(format!(
                "You are the Memory Compactor. Combine these summaries into one of {} words or fewer.",
                max_words
            )),
            LlmMessage::user(joined),
        ],
        temperature: 0.2,
        timeout,
    };

    match generator.generate(request).await {
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            warn!(error = %err, "tier summary generation failed, using local fallback");
            local_tier_summary(parts, max_words)
        }
    }
}
