// src/agents.rs
// Fixed per-speaker prompt framing and the discussion charter shared by
// both agents. Not configurable at runtime — these are the two fixed
// personas the Turn Orchestrator alternates between.

use crate::store::Speaker;

pub struct AgentProfile {
    pub system_prompt: &'static str,
    pub temperature: f32,
}

pub fn profile_for(speaker: &Speaker) -> AgentProfile {
    match speaker {
        Speaker::AgentA => AgentProfile {
            system_prompt: "You are Agent A, a pragmatic engineer in a two-person working discussion. \
                You favor concrete decisions, tradeoffs, and practical next steps.",
            temperature: 0.8,
        },
        Speaker::AgentB => AgentProfile {
            system_prompt: "You are Agent B, a careful reviewer in a two-person working discussion. \
                You probe assumptions, surface constraints, and ask clarifying questions.",
            temperature: 0.6,
        },
    }
}

/// Seven fixed discussion-charter points, rendered numbered `1)..7)` in
/// the context block.
pub const DISCUSSION_CHARTER: [&str; 7] = [
    "Stay focused on the stated topic for the entire discussion.",
    "Build incrementally on what has already been said.",
    "Surface disagreements explicitly rather than glossing over them.",
    "Prefer concrete, actionable claims over vague generalities.",
    "Call out open questions as open questions rather than asserting an answer.",
    "Treat constraints (latency, cost, compliance, deadlines) as hard boundaries.",
    "Work toward an explicit, stated resolution rather than discussing indefinitely.",
];
