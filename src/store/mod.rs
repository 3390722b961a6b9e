// src/store/mod.rs
// Store contract: durable, transactional persistence of conversations,
// messages, memory rows, summaries, and the conflict ledger.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Speaker {
    AgentA,
    AgentB,
}

impl Speaker {
    pub fn speaker_id(&self) -> &'static str {
        match self {
            Speaker::AgentA => "agent-a",
            Speaker::AgentB => "agent-b",
        }
    }

    /// The speaker for a given 1-indexed turn, alternating agent-a/agent-b.
    pub fn for_turn(turn: i64) -> Self {
        if (turn - 1).rem_euclid(2) == 0 {
            Speaker::AgentA
        } else {
            Speaker::AgentB
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub turn: i64,
    pub speaker_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: String,
    pub turn: i64,
    pub speaker_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalTokenRow {
    pub token: String,
    pub weight: f64,
    pub occurrences: i64,
    pub last_turn: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SemanticStatus {
    Open,
    Active,
    Resolved,
}

impl SemanticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticStatus::Open => "open",
            SemanticStatus::Active => "active",
            SemanticStatus::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "open" => SemanticStatus::Open,
            "resolved" => SemanticStatus::Resolved,
            _ => SemanticStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticItemRow {
    pub item_type: String,
    pub canonical_text: String,
    pub evidence_text: String,
    pub weight: f64,
    pub confidence: f64,
    pub occurrences: i64,
    pub first_turn: i64,
    pub last_turn: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub start_turn: i64,
    pub end_turn: i64,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Meso,
    Macro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Meso => "meso",
            Tier::Macro => "macro",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntryRow {
    pub issue_key: String,
    pub item_a: String,
    pub item_b: String,
    pub confidence: f64,
    pub status: String,
    pub first_turn: i64,
    pub last_turn: i64,
    pub occurrences: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    pub token_count: i64,
    pub summary_count: i64,
    pub semantic_count: i64,
    pub decision_count: i64,
    pub open_question_count: i64,
    pub constraint_count: i64,
    pub definition_count: i64,
    pub last_summary_turn: i64,
}

/// Narrow CRUD + atomic batch operations over the persisted conversation
/// state. Batch writes are single atomic units; partial application is
/// forbidden. Prune operations keep the top-N by `(weight desc, last_turn
/// desc, key asc)` and must be idempotent.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError>;
    async fn create_conversation(&self, id: &str, topic: &str) -> Result<Conversation, StoreError>;

    /// Appends messages atomically and touches `updated_at`. Fails with
    /// `StoreError::DuplicateTurn` if any `(conversation_id, turn)` exists.
    async fn append_messages(
        &self,
        conversation_id: &str,
        entries: &[NewMessage],
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;
    async fn get_messages_in_range(
        &self,
        conversation_id: &str,
        start_turn: i64,
        end_turn: i64,
    ) -> Result<Vec<Message>, StoreError>;
    async fn get_messages_up_to_turn(
        &self,
        conversation_id: &str,
        turn: i64,
    ) -> Result<Vec<Message>, StoreError>;

    async fn upsert_lexical_tokens(
        &self,
        conversation_id: &str,
        tokens: &[LexicalTokenRow],
    ) -> Result<(), StoreError>;
    async fn prune_lexical_tokens(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError>;
    async fn list_lexical_tokens(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<LexicalTokenRow>, StoreError>;

    async fn upsert_semantic_items(
        &self,
        conversation_id: &str,
        items: &[SemanticItemRow],
    ) -> Result<(), StoreError>;
    async fn prune_semantic_items(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError>;
    async fn list_semantic_items(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<SemanticItemRow>, StoreError>;

    /// `INSERT OR IGNORE` semantics on `(start_turn, end_turn)`.
    async fn insert_micro_summary(
        &self,
        conversation_id: &str,
        row: &SummaryRow,
    ) -> Result<(), StoreError>;
    async fn list_recent_micro_summaries(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<SummaryRow>, StoreError>;
    async fn list_all_micro_summaries(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<SummaryRow>, StoreError>;

    async fn insert_tier_summary(
        &self,
        conversation_id: &str,
        tier: Tier,
        row: &SummaryRow,
    ) -> Result<(), StoreError>;
    async fn list_recent_tier_summaries(
        &self,
        conversation_id: &str,
        tier: Tier,
        limit: usize,
    ) -> Result<Vec<SummaryRow>, StoreError>;
    async fn list_all_tier_summaries(
        &self,
        conversation_id: &str,
        tier: Tier,
    ) -> Result<Vec<SummaryRow>, StoreError>;

    async fn upsert_conflict_entries(
        &self,
        conversation_id: &str,
        entries: &[ConflictEntryRow],
    ) -> Result<(), StoreError>;
    async fn prune_conflict_entries(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError>;
    async fn list_conflict_entries(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConflictEntryRow>, StoreError>;

    async fn get_memory_stats(&self, conversation_id: &str) -> Result<MemoryStats, StoreError>;
}
