// src/memory/mod.rs
// Memory Engine: sits on Store + Extractor, owns the lexical/semantic/
// summary/conflict state for a conversation, and produces the
// compressed view consumed by the Context Assembler.

pub mod conflict;
pub mod summarize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::error::{ColloquyResult, StoreError};
use crate::extractor::{dedupe_semantic, dedupe_tokens, extract_semantic_candidates, extract_tokens};
use crate::llm::Generator;
use crate::store::{
    ConflictEntryRow, LexicalTokenRow, Message, MemoryStats, SemanticItemRow, Store, SummaryRow,
    Tier,
};

/// The bounded DTO produced for the Context Assembler: everything it
/// needs to render a prompt, already capped and ordered.
#[derive(Debug, Clone)]
pub struct CompressedView {
    pub lexical_tokens: Vec<LexicalTokenRow>,
    pub micro_summaries: Vec<SummaryRow>,
    pub meso_summaries: Vec<SummaryRow>,
    pub macro_summaries: Vec<SummaryRow>,
    pub semantic_by_type: HashMap<&'static str, Vec<SemanticItemRow>>,
    pub conflicts: Vec<ConflictEntryRow>,
    pub stats: MemoryStats,
}

const SEMANTIC_TYPES: [&str; 5] = ["decision", "hypothesis", "constraint", "definition", "open_question"];
const MICRO_SUMMARY_MAX_WORDS: usize = 110;
const TIER_SUMMARY_MAX_WORDS: usize = 130;

pub struct MemoryEngine<S: Store> {
    store: Arc<S>,
    config: MemoryConfig,
    llm_timeout: Duration,
}

impl<S: Store> MemoryEngine<S> {
    pub fn new(store: Arc<S>, config: MemoryConfig, llm_timeout: Duration) -> Self {
        Self { store, config, llm_timeout }
    }

    /// Extracts from the full transcript and runs compaction only if the
    /// conversation has no memory yet; otherwise a no-op on extraction
    /// (compaction still runs — see the open-question note in DESIGN.md).
    pub async fn bootstrap_if_needed(
        &self,
        conversation_id: &str,
        generator: &dyn Generator,
    ) -> ColloquyResult<()> {
        let stats = self.store.get_memory_stats(conversation_id).await?;
        let messages = self.store.get_messages(conversation_id).await?;

        if stats.token_count == 0 && stats.semantic_count == 0 && !messages.is_empty() {
            debug!(conversation_id, "bootstrapping memory from full transcript");
            self.extract_and_update(conversation_id, &messages).await?;
            self.recompute_conflicts(conversation_id).await?;
        }

        self.run_compaction(conversation_id, messages.len() as i64, generator).await?;
        Ok(())
    }

    /// Extracts from `new_entries` only, updates lexical/semantic state,
    /// recomputes the conflict ledger, and drives compaction.
    pub async fn ingest(
        &self,
        conversation_id: &str,
        new_entries: &[Message],
        total_turns: i64,
        generator: &dyn Generator,
    ) -> ColloquyResult<MemoryStats> {
        if !new_entries.is_empty() {
            self.extract_and_update(conversation_id, new_entries).await?;
            self.recompute_conflicts(conversation_id).await?;
        }
        self.run_compaction(conversation_id, total_turns, generator).await?;
        Ok(self.store.get_memory_stats(conversation_id).await?)
    }

    pub async fn get_compressed_view(&self, conversation_id: &str) -> ColloquyResult<CompressedView> {
        let lexical_tokens = self
            .store
            .list_lexical_tokens(conversation_id, self.config.prompt_token_limit)
            .await?;
        let micro_summaries = self.store.list_recent_micro_summaries(conversation_id, 6).await?;
        let meso_summaries = self
            .store
            .list_recent_tier_summaries(conversation_id, Tier::Meso, 4)
            .await?;
        let macro_summaries = self
            .store
            .list_recent_tier_summaries(conversation_id, Tier::Macro, 3)
            .await?;
        let conflicts = self
            .store
            .list_conflict_entries(conversation_id, self.config.prompt_conflict_limit)
            .await?;
        let stats = self.store.get_memory_stats(conversation_id).await?;

        // Top-N overall first (Store's native weight-desc ordering), then
        // regroup by type so one type can't crowd out another beyond the
        // shared cap.
        let top_semantic = self
            .store
            .list_semantic_items(conversation_id, self.config.prompt_semantic_limit)
            .await?;
        let mut semantic_by_type: HashMap<&'static str, Vec<SemanticItemRow>> = HashMap::new();
        for type_name in SEMANTIC_TYPES {
            let items: Vec<SemanticItemRow> = top_semantic
                .iter()
                .filter(|i| i.item_type == type_name)
                .take(6)
                .cloned()
                .collect();
            semantic_by_type.insert(type_name, items);
        }

        Ok(CompressedView {
            lexical_tokens,
            micro_summaries,
            meso_summaries,
            macro_summaries,
            semantic_by_type,
            conflicts,
            stats,
        })
    }

    async fn extract_and_update(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let per_message_tokens: Vec<(i64, Vec<_>)> = messages
            .iter()
            .map(|m| (m.turn, extract_tokens(&m.text)))
            .collect();
        let deduped_tokens = dedupe_tokens(&per_message_tokens);

        let token_rows: Vec<LexicalTokenRow> = deduped_tokens
            .into_iter()
            .map(|t| LexicalTokenRow {
                token: t.token,
                weight: t.weight,
                occurrences: t.occurrences as i64,
                last_turn: t.last_turn,
            })
            .collect();

        if !token_rows.is_empty() {
            self.store.upsert_lexical_tokens(conversation_id, &token_rows).await?;
            self.store
                .prune_lexical_tokens(conversation_id, self.config.lexical_keep)
                .await?;
        }

        let candidates: Vec<_> = messages
            .iter()
            .flat_map(|m| extract_semantic_candidates(&m.text, m.turn))
            .collect();
        let deduped_semantic = dedupe_semantic(candidates);

        let semantic_rows: Vec<SemanticItemRow> = deduped_semantic
            .into_iter()
            .map(|s| SemanticItemRow {
                item_type: s.item_type.as_str().to_string(),
                canonical_text: s.canonical_text,
                evidence_text: s.evidence_text,
                weight: s.weight,
                confidence: s.confidence,
                occurrences: s.occurrences as i64,
                first_turn: s.first_turn,
                last_turn: s.last_turn,
                status: s.item_type.initial_status().to_string(),
            })
            .collect();

        if !semantic_rows.is_empty() {
            self.store
                .upsert_semantic_items(conversation_id, &semantic_rows)
                .await?;
            self.store
                .prune_semantic_items(conversation_id, self.config.semantic_keep)
                .await?;
        }

        Ok(())
    }

    async fn recompute_conflicts(&self, conversation_id: &str) -> Result<(), StoreError> {
        let items = self.store.list_semantic_items(conversation_id, 500).await?;
        let entries = conflict::detect_conflicts(&items);
        if !entries.is_empty() {
            self.store.upsert_conflict_entries(conversation_id, &entries).await?;
        }
        self.store
            .prune_conflict_entries(conversation_id, self.config.conflict_keep)
            .await?;
        Ok(())
    }

    async fn run_compaction(
        &self,
        conversation_id: &str,
        total_turns: i64,
        generator: &dyn Generator,
    ) -> Result<(), StoreError> {
        self.run_micro_summarization(conversation_id, total_turns, generator).await?;

        let micro = self.store.list_all_micro_summaries(conversation_id).await?;
        self.compact_tier(conversation_id, &micro, Tier::Meso, self.config.meso_group, generator)
            .await?;

        let meso = self.store.list_all_tier_summaries(conversation_id, Tier::Meso).await?;
        self.compact_tier(conversation_id, &meso, Tier::Macro, self.config.macro_group, generator)
            .await?;

        Ok(())
    }

    async fn run_micro_summarization(
        &self,
        conversation_id: &str,
        total_turns: i64,
        generator: &dyn Generator,
    ) -> Result<(), StoreError> {
        if total_turns < self.config.min_turns_for_summary {
            return Ok(());
        }

        loop {
            let existing = self.store.list_all_micro_summaries(conversation_id).await?;
            let last_end = existing.iter().map(|s| s.end_turn).max().unwrap_or(0);
            if total_turns - last_end < self.config.summary_window {
                break;
            }

            let start = last_end + 1;
            let end = last_end + self.config.summary_window;
            let window_messages = self.store.get_messages_in_range(conversation_id, start, end).await?;
            let summary = summarize::summarize_window(
                &window_messages,
                generator,
                self.llm_timeout,
                MICRO_SUMMARY_MAX_WORDS,
            )
            .await;

            self.store
                .insert_micro_summary(
                    conversation_id,
                    &SummaryRow { start_turn: start, end_turn: end, summary },
                )
                .await?;
            info!(conversation_id, start, end, "micro summary inserted");
        }

        Ok(())
    }

    async fn compact_tier(
        &self,
        conversation_id: &str,
        source: &[SummaryRow],
        target_tier: Tier,
        group: usize,
        generator: &dyn Generator,
    ) -> Result<(), StoreError> {
        let existing = self.store.list_all_tier_summaries(conversation_id, target_tier).await?;
        let tail = existing.iter().map(|s| s.end_turn).max().unwrap_or(0);

        let mut pending: Vec<&SummaryRow> = source.iter().filter(|s| s.end_turn > tail).collect();
        pending.sort_by_key(|s| s.start_turn);

        let mut idx = 0;
        while pending.len() - idx >= group {
            let chunk = &pending[idx..idx + group];
            let start = chunk[0].start_turn;
            let end = chunk[chunk.len() - 1].end_turn;
            let parts: Vec<&str> = chunk.iter().map(|s| s.summary.as_str()).collect();
            let summary =
                summarize::summarize_tier(&parts, generator, self.llm_timeout, TIER_SUMMARY_MAX_WORDS).await;

            self.store
                .insert_tier_summary(
                    conversation_id,
                    target_tier,
                    &SummaryRow { start_turn: start, end_turn: end, summary },
                )
                .await?;
            info!(conversation_id, tier = target_tier.as_str(), start, end, "tier summary inserted");
            idx += group;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LocalDeterministic;
    use crate::store::sqlite::SqliteStore;
    use crate::store::NewMessage;

    async fn seeded_store(turns: i64) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        store.create_conversation("c1", "cache policy").await.unwrap();
        let entries: Vec<NewMessage> = (1..=turns)
            .map(|t| NewMessage {
                turn: t,
                speaker_id: if t % 2 == 1 { "agent-a" } else { "agent-b" }.to_string(),
                text: format!("We should adopt optimistic locking for the database in turn {}.", t),
            })
            .collect();
        store.append_messages("c1", &entries).await.unwrap();
        store
    }

    #[tokio::test]
    async fn tiered_compaction_counts_match_scenario() {
        let store = seeded_store(16).await;
        let config = MemoryConfig {
            min_turns_for_summary: 4,
            summary_window: 4,
            meso_group: 2,
            ..MemoryConfig::from_env()
        };
        let engine = MemoryEngine::new(store.clone(), config, Duration::from_millis(100));
        let generator = LocalDeterministic;

        engine.bootstrap_if_needed("c1", &generator).await.unwrap();

        let micro = store.list_all_micro_summaries("c1").await.unwrap();
        let meso = store.list_all_tier_summaries("c1", Tier::Meso).await.unwrap();
        let macro_ = store.list_all_tier_summaries("c1", Tier::Macro).await.unwrap();

        assert_eq!(micro.len(), 4);
        assert_eq!(meso.len(), 2);
        assert_eq!(macro_.len(), 0);
    }

    #[tokio::test]
    async fn lexical_upsert_is_monotonic_across_ingests() {
        let store = seeded_store(0).await;
        let config = MemoryConfig::from_env();
        let engine = MemoryEngine::new(store.clone(), config, Duration::from_millis(100));
        let generator = LocalDeterministic;

        let first = vec![Message {
            conversation_id: "c1".into(),
            turn: 1,
            speaker_id: "agent-a".into(),
            text: "database database migration plan".into(),
            created_at: chrono::Utc::now(),
        }];
        store
            .append_messages(
                "c1",
                &[NewMessage { turn: 1, speaker_id: "agent-a".into(), text: first[0].text.clone() }],
            )
            .await
            .unwrap();
        engine.ingest("c1", &first, 1, &generator).await.unwrap();
        let after_first = store.list_lexical_tokens("c1", 10).await.unwrap();
        let w1 = after_first.iter().find(|t| t.token == "database").unwrap().weight;

        let second = vec![Message {
            conversation_id: "c1".into(),
            turn: 2,
            speaker_id: "agent-b".into(),
            text: "database rollback plan".into(),
            created_at: chrono::Utc::now(),
        }];
        store
            .append_messages(
                "c1",
                &[NewMessage { turn: 2, speaker_id: "agent-b".into(), text: second[0].text.clone() }],
            )
            .await
            .unwrap();
        engine.ingest("c1", &second, 2, &generator).await.unwrap();
        let after_second = store.list_lexical_tokens("c1", 10).await.unwrap();
        let w2 = after_second.iter().find(|t| t.token == "database").unwrap().weight;

        assert!(w2 >= w1);
    }
}
