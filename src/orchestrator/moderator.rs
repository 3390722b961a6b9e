// src/orchestrator/moderator.rs
// Moderator: periodically inspects recent turns and returns a directive
// steering the next generation, preferring an LLM judgment with a
// permissive JSON extractor and a fully local fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::extractor::jaccard;
use crate::llm::{GenerationRequest, Generator, Message as LlmMessage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResult {
    pub on_topic: bool,
    pub repetitive: bool,
    pub too_short: bool,
    pub done: bool,
    pub directive: String,
}

/// Scans `text` for the first balanced-looking `{...}` substring and
/// parses it as `ModerationResult`. Permissive by design: providers often
/// wrap JSON in prose or code fences.
fn extract_json_object(text: &str) -> Option<ModerationResult> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn normalize_first_token(topic: &str) -> String {
    topic
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase()
}

fn local_moderation(topic: &str, last: &str, previous: Option<&str>) -> ModerationResult {
    let first_topic_token = normalize_first_token(topic);
    let on_topic = first_topic_token.is_empty() || last.to_lowercase().contains(&first_topic_token);
    let repetitive = previous.map(|p| jaccard(last, p) > 0.88).unwrap_or(false);
    let too_short = last.split_whitespace().count() < 8;

    let mut directive = if !on_topic {
        format!("Steer back to topic: {}", topic)
    } else if repetitive {
        "Avoid repeating prior wording; add a counterpoint or new evidence.".to_string()
    } else if too_short {
        "Add depth: one rationale and one practical implication.".to_string()
    } else {
        "Increase specificity with one concrete actionable point.".to_string()
    };
    directive.truncate(280);

    ModerationResult { on_topic, repetitive, too_short, done: false, directive }
}

pub struct Moderator;

impl Moderator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates the last few turns. `last_turns` is at most 8 messages
    /// formatted `speaker: text`; `top_tokens` is at most 20 lexical
    /// tokens; `current_directive` is the directive in effect before this
    /// evaluation (it is echoed into the prompt, not into the fallback).
    pub async fn evaluate(
        &self,
        topic: &str,
        last_turns: &[String],
        top_tokens: &[String],
        current_directive: Option<&str>,
        generator: &dyn Generator,
        timeout: Duration,
    ) -> ModerationResult {
        let last = last_turns.last().cloned().unwrap_or_default();
        let previous = if last_turns.len() >= 2 {
            Some(last_turns[last_turns.len() - 2].clone())
        } else {
            None
        };

        let prompt = format!(
            "Topic: {}\nCurrent directive: {}\nTop memory tokens: {}\nRecent turns:\n{}\n\n\
            Respond with a single JSON object: {{\"on_topic\": bool, \"repetitive\": bool, \
            \"too_short\": bool, \"done\": bool, \"directive\": string}}.",
            topic,
            current_directive.unwrap_or("(none yet)"),
            top_tokens.join(", "),
            last_turns.join("\n"),
        );

        let request = GenerationRequest {
            messages: vec![
                LlmMessage::system("You are a discussion moderator. Respond with JSON only."),
                LlmMessage::user(prompt),
            ],
            temperature: 0.0,
            timeout,
        };

        match generator.generate(request).await {
            Ok(text) => match extract_json_object(&text) {
                Some(mut result) => {
                    result.directive.truncate(280);
                    result
                }
                None => {
                    warn!("moderator response was not valid JSON, using local fallback");
                    local_moderation(topic, &last, previous.as_deref())
                }
            },
            Err(err) => {
                warn!(error = %err, "moderator generation failed, using local fallback");
                local_moderation(topic, &last, previous.as_deref())
            }
        }
    }
}

impl Default for Moderator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_prose_wrapper() {
        let text = "Sure, here is my assessment:\n{\"on_topic\": true, \"repetitive\": false, \"too_short\": false, \"done\": false, \"directive\": \"keep going\"}\nHope that helps.";
        let parsed = extract_json_object(text).unwrap();
        assert!(parsed.on_topic);
        assert_eq!(parsed.directive, "keep going");
    }

    #[test]
    fn local_moderation_flags_off_topic() {
        let result = local_moderation("cache policy", "Let's talk about lunch instead.", None);
        assert!(!result.on_topic);
        assert!(result.directive.starts_with("Steer back to topic"));
    }

    #[test]
    fn local_moderation_flags_repetitive() {
        let text = "we will adopt optimistic locking for the database layer entirely";
        let result = local_moderation("cache policy database layer", text, Some(text));
        assert!(result.repetitive);
    }

    #[test]
    fn local_moderation_flags_too_short() {
        let result = local_moderation("cache policy", "Sure, agreed.", None);
        assert!(result.too_short);
    }
}
