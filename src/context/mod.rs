// src/context/mod.rs
// Context Assembler: a pure function rendering the compressed view, the
// recent transcript, the discussion charter, and the moderator directive
// into a single prompt-ready text block. No I/O, deterministic given
// identical inputs.

use crate::memory::CompressedView;
use crate::store::Message;

/// Free-form framing for a conversation, surfaced in the rendered block
/// ahead of the charter. All fields are optional — a conversation started
/// from a bare topic renders the "(no explicit …)" placeholders.
#[derive(Debug, Clone, Default)]
pub struct ConversationBrief {
    pub objective: Option<String>,
    pub constraints: Option<String>,
    pub done_criteria: Option<String>,
}

/// Everything the Assembler needs to render one prompt.
pub struct ContextInputs<'a> {
    pub topic: &'a str,
    pub recent_transcript: &'a [Message],
    pub compressed_view: &'a CompressedView,
    pub moderator_directive: Option<&'a str>,
    pub charter: &'a [String],
    pub brief: Option<&'a ConversationBrief>,
}

const DEFAULT_MODERATOR_DIRECTIVE: &str = "continue depth-first reasoning and avoid repetition";

const TRAILING_INSTRUCTIONS: [&str; 7] = [
    "Keep your reply to 2-4 sentences.",
    "Stay anchored to the stated topic; do not drift into unrelated subjects.",
    "Reference or build on the previous point before adding a new one.",
    "Do not open with a template greeting or restate the topic verbatim.",
    "If and only if the discussion has fully reached its objective, prefix your reply with `DONE:` followed by a one-sentence resolution.",
    "Otherwise never use the `DONE:` prefix.",
    "Write in plain prose, not lists or headings.",
];

fn render_brief(brief: Option<&ConversationBrief>) -> Vec<String> {
    let b = brief.cloned().unwrap_or_default();
    vec![
        format!("Objective: {}", b.objective.unwrap_or_else(|| "(no explicit objective)".to_string())),
        format!(
            "Constraints: {}",
            b.constraints.unwrap_or_else(|| "(no explicit constraints)".to_string())
        ),
        format!(
            "Done criteria: {}",
            b.done_criteria.unwrap_or_else(|| "(no explicit done criteria)".to_string())
        ),
    ]
}

fn render_charter(charter: &[String]) -> Vec<String> {
    charter
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}) {}", i + 1, item))
        .collect()
}

fn render_summary_list(label: &str, summaries: &[crate::store::SummaryRow], empty_placeholder: &str) -> Vec<String> {
    if summaries.is_empty() {
        return vec![empty_placeholder.to_string()];
    }
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}{} (turns {}-{}): {}", label, i + 1, s.start_turn, s.end_turn, s.summary))
        .collect()
}

fn render_semantic_section(
    heading: &str,
    view: &CompressedView,
    item_type: &str,
) -> Vec<String> {
    let mut lines = vec![format!("{}:", heading)];
    let items = view.semantic_by_type.get(item_type).cloned().unwrap_or_default();
    if items.is_empty() {
        lines.push("(none)".to_string());
    } else {
        for (i, item) in items.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, item.canonical_text));
        }
    }
    lines
}

fn render_conflicts(view: &CompressedView) -> Vec<String> {
    if view.conflicts.is_empty() {
        return vec!["(none detected)".to_string()];
    }
    view.conflicts
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{}. ({}, conf {:.2}) {} <> {}",
                i + 1,
                c.status,
                c.confidence,
                c.item_a,
                c.item_b
            )
        })
        .collect()
}

fn render_recent_turns(messages: &[Message]) -> Vec<String> {
    if messages.is_empty() {
        return vec!["(No recent turns)".to_string()];
    }
    messages.iter().map(|m| format!("{}: {}", m.speaker_id, m.text)).collect()
}

/// Renders the full context block. Deterministic: identical inputs
/// produce byte-identical output.
pub fn assemble(inputs: &ContextInputs) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!("Topic: {}", inputs.topic));
    sections.extend(render_brief(inputs.brief));
    sections.extend(render_charter(inputs.charter));

    let tokens_line = if inputs.compressed_view.lexical_tokens.is_empty() {
        "High-value memory tokens: (none yet)".to_string()
    } else {
        let list = inputs
            .compressed_view
            .lexical_tokens
            .iter()
            .map(|t| t.token.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("High-value memory tokens: {}", list)
    };
    sections.push(tokens_line);

    sections.extend(render_summary_list("S", &inputs.compressed_view.micro_summaries, "(no micro summaries yet)"));
    sections.extend(render_summary_list("M", &inputs.compressed_view.meso_summaries, "(no meso summaries yet)"));
    sections.extend(render_summary_list("X", &inputs.compressed_view.macro_summaries, "(no macro summaries yet)"));

    sections.extend(render_semantic_section("Decisions", inputs.compressed_view, "decision"));
    sections.extend(render_semantic_section("Hypotheses", inputs.compressed_view, "hypothesis"));
    sections.extend(render_semantic_section("Constraints", inputs.compressed_view, "constraint"));
    sections.extend(render_semantic_section("Definitions", inputs.compressed_view, "definition"));
    sections.extend(render_semantic_section("Open questions", inputs.compressed_view, "open_question"));

    sections.push("Conflict ledger:".to_string());
    sections.extend(render_conflicts(inputs.compressed_view));

    sections.push(format!(
        "Moderator directive: {}",
        inputs.moderator_directive.unwrap_or(DEFAULT_MODERATOR_DIRECTIVE)
    ));

    sections.push("Recent turns:".to_string());
    sections.extend(render_recent_turns(inputs.recent_transcript));

    sections.extend(TRAILING_INSTRUCTIONS.iter().map(|s| s.to_string()));

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStats, Message};
    use std::collections::HashMap;

    fn empty_view() -> CompressedView {
        CompressedView {
            lexical_tokens: vec![],
            micro_summaries: vec![],
            meso_summaries: vec![],
            macro_summaries: vec![],
            semantic_by_type: HashMap::new(),
            conflicts: vec![],
            stats: MemoryStats::default(),
        }
    }

    #[test]
    fn renders_placeholders_when_everything_empty() {
        let view = empty_view();
        let charter = vec!["Stay on topic".to_string()];
        let inputs = ContextInputs {
            topic: "cache policy",
            recent_transcript: &[],
            compressed_view: &view,
            moderator_directive: None,
            charter: &charter,
            brief: None,
        };
        let block = assemble(&inputs);

        assert!(block.starts_with("Topic: cache policy"));
        assert!(block.contains("(no explicit objective)"));
        assert!(block.contains("1) Stay on topic"));
        assert!(block.contains("(none yet)"));
        assert!(block.contains("(no micro summaries yet)"));
        assert!(block.contains("(none detected)"));
        assert!(block.contains("(No recent turns)"));
        assert!(block.contains(DEFAULT_MODERATOR_DIRECTIVE));
    }

    #[test]
    fn section_order_matches_contract() {
        let view = empty_view();
        let charter = vec!["Stay on topic".to_string()];
        let inputs = ContextInputs {
            topic: "cache policy",
            recent_transcript: &[],
            compressed_view: &view,
            moderator_directive: None,
            charter: &charter,
            brief: None,
        };
        let block = assemble(&inputs);

        let topic_idx = block.find("Topic:").unwrap();
        let charter_idx = block.find("1) Stay on topic").unwrap();
        let tokens_idx = block.find("High-value memory tokens:").unwrap();
        let conflict_idx = block.find("Conflict ledger:").unwrap();
        let moderator_idx = block.find("Moderator directive:").unwrap();
        let recent_idx = block.find("Recent turns:").unwrap();

        assert!(topic_idx < charter_idx);
        assert!(charter_idx < tokens_idx);
        assert!(tokens_idx < conflict_idx);
        assert!(conflict_idx < moderator_idx);
        assert!(moderator_idx < recent_idx);
    }

    #[test]
    fn renders_recent_turns_and_custom_moderator_directive() {
        let view = empty_view();
        let charter = vec![];
        let transcript = vec![Message {
            conversation_id: "c1".into(),
            turn: 1,
            speaker_id: "agent-a".into(),
            text: "We should adopt optimistic locking.".into(),
            created_at: chrono::Utc::now(),
        }];
        let inputs = ContextInputs {
            topic: "cache policy",
            recent_transcript: &transcript,
            compressed_view: &view,
            moderator_directive: Some("Add a counterpoint."),
            charter: &charter,
            brief: None,
        };
        let block = assemble(&inputs);
        assert!(block.contains("agent-a: We should adopt optimistic locking."));
        assert!(block.contains("Moderator directive: Add a counterpoint."));
    }
}
