// src/orchestrator/mod.rs
// Turn Orchestrator: the per-conversation state machine. Drives
// Assembler -> LLM (or local fallback) -> quality guard -> Store, and
// periodically invokes the Moderator.

pub mod moderator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::sync::{mpsc::UnboundedSender, Mutex, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::agents;
use crate::config::OrchestratorConfig;
use crate::context::{assemble, ContextInputs, ConversationBrief};
use crate::error::{ColloquyResult, ValidationError};
use crate::extractor::jaccard;
use crate::llm::{GenerationRequest, Generator, Message as LlmMessage};
use crate::memory::MemoryEngine;
use crate::store::{MemoryStats, Message, NewMessage, Speaker, Store};

use moderator::{Moderator, ModerationResult};

static DONE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*done\s*[:\-]?\s*").unwrap());

/// Strips a case-insensitive `DONE:` (or `DONE-`, `DONE `) prefix, returning
/// whether it was present and the text with the prefix removed.
fn strip_done_prefix(text: &str) -> (bool, String) {
    match DONE_PREFIX_RE.find(text) {
        Some(m) => (true, text[m.end()..].trim().to_string()),
        None => (false, text.trim().to_string()),
    }
}

fn clamp_turns(turns: Option<i64>) -> i64 {
    turns.map(|t| t.clamp(2, 10)).unwrap_or(10)
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: Option<String>,
    pub topic: Option<String>,
    pub turns: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnEntry {
    pub turn: i64,
    pub speaker: String,
    pub speaker_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Quality {
    pub similarity_to_previous: f64,
    pub repetition_streak: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Guardrails {
    pub moderator_interval: i64,
    pub max_generation_ms: i64,
    pub max_repetition_streak: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Meta {
        conversation_id: String,
        topic: String,
        engine: &'static str,
        memory: MemoryStats,
        charter: Vec<String>,
        guardrails: Guardrails,
    },
    Turn {
        entry: TurnEntry,
        total_turns: i64,
        quality: Quality,
    },
    Moderator {
        moderation: ModerationResult,
        total_turns: i64,
    },
    Done {
        conversation_id: String,
        topic: String,
        turns: i64,
        total_turns: i64,
        stop_reason: String,
        memory: MemoryStats,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct DoneSummary {
    pub conversation_id: String,
    pub topic: String,
    pub turns: i64,
    pub total_turns: i64,
    pub stop_reason: String,
    pub memory_stats: MemoryStats,
}

fn display_name(speaker: &Speaker) -> &'static str {
    match speaker {
        Speaker::AgentA => "Agent A",
        Speaker::AgentB => "Agent B",
    }
}

pub struct TurnOrchestrator<S: Store> {
    store: Arc<S>,
    memory: Arc<MemoryEngine<S>>,
    generator: Arc<dyn Generator>,
    config: OrchestratorConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: Store> TurnOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        memory: Arc<MemoryEngine<S>>,
        generator: Arc<dyn Generator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { store, memory, generator, config, locks: RwLock::new(HashMap::new()) }
    }

    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(conversation_id) {
            return lock.clone();
        }
        self.locks
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn resolve(&self, request: &TurnRequest) -> ColloquyResult<(String, String)> {
        if let Some(id) = &request.conversation_id {
            let conversation = self
                .store
                .get_conversation(id)
                .await?
                .ok_or_else(|| ValidationError::UnknownConversation(id.clone()))?;
            Ok((conversation.id, conversation.topic))
        } else {
            let topic = request.topic.clone().ok_or(ValidationError::MissingTopic)?;
            let id = Uuid::new_v4().to_string();
            let conversation = self.store.create_conversation(&id, &topic).await?;
            Ok((conversation.id, conversation.topic))
        }
    }

    /// Runs up to `request.turns` generation turns for one conversation,
    /// emitting NDJSON-equivalent `Event`s as they occur and returning a
    /// terminal summary. Holds the per-conversation lock for the whole
    /// generate-commit-ingest critical section.
    #[instrument(skip(self, events))]
    pub async fn run_conversation(
        &self,
        request: TurnRequest,
        events: UnboundedSender<Event>,
    ) -> ColloquyResult<DoneSummary> {
        let turns = clamp_turns(request.turns);
        let (conversation_id, topic) = self.resolve(&request).await?;

        let lock = self.lock_for(&conversation_id).await;
        let _guard = lock.lock().await;

        self.memory.bootstrap_if_needed(&conversation_id, self.generator.as_ref()).await?;
        let compressed_view = self.memory.get_compressed_view(&conversation_id).await?;

        let guardrails = Guardrails {
            moderator_interval: self.config.moderator_interval,
            max_generation_ms: self.config.max_generation_ms,
            max_repetition_streak: self.config.max_repetition_streak,
        };
        let _ = events.send(Event::Meta {
            conversation_id: conversation_id.clone(),
            topic: topic.clone(),
            engine: "colloquy",
            memory: compressed_view.stats.clone(),
            charter: agents::DISCUSSION_CHARTER.iter().map(|s| s.to_string()).collect(),
            guardrails,
        });

        let mut transcript = self.store.get_messages(&conversation_id).await?;
        let mut pending: Vec<NewMessage> = Vec::new();
        let mut moderator_directive: Option<String> = None;
        let mut repetition_streak: i64 = 0;
        let mut stop_reason = "max_turns".to_string();
        let moderator = Moderator::new();
        let charter_vec: Vec<String> = agents::DISCUSSION_CHARTER.iter().map(|s| s.to_string()).collect();
        let llm_timeout = Duration::from_millis(self.config.llm_request_timeout_ms);
        let start = Instant::now();

        for _ in 0..turns {
            if start.elapsed().as_millis() as i64 > self.config.max_generation_ms {
                stop_reason = "time_limit".to_string();
                break;
            }

            let next_turn = transcript.len() as i64 + 1;
            let speaker = Speaker::for_turn(next_turn);
            let profile = agents::profile_for(&speaker);

            let recent: Vec<Message> = transcript.iter().rev().take(10).rev().cloned().collect();
            let block = assemble(&ContextInputs {
                topic: &topic,
                recent_transcript: &recent,
                compressed_view: &compressed_view,
                moderator_directive: moderator_directive.as_deref(),
                charter: &charter_vec,
                brief: None::<&ConversationBrief>,
            });

            let request = GenerationRequest {
                messages: vec![LlmMessage::system(profile.system_prompt), LlmMessage::user(block)],
                temperature: profile.temperature,
                timeout: llm_timeout,
            };

            let raw = match self.generator.generate(request).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "turn generation failed, using local fallback");
                    match moderator_directive.as_deref() {
                        Some(directive) => format!(
                            "Building on the discussion about {}, and following the directive to {}, here is a next concrete point to consider.",
                            topic, directive
                        ),
                        None => format!(
                            "Building on the discussion about {}, here is a next concrete point to consider.",
                            topic
                        ),
                    }
                }
            };

            let (signaled_done, text) = strip_done_prefix(&raw);

            let previous_text = transcript.last().map(|m| m.text.clone());
            let similarity = previous_text.as_deref().map(|p| jaccard(p, &text)).unwrap_or(0.0);
            repetition_streak = if similarity >= 0.90 { repetition_streak + 1 } else { 0 };

            let message = Message {
                conversation_id: conversation_id.clone(),
                turn: next_turn,
                speaker_id: speaker.speaker_id().to_string(),
                text: text.clone(),
                created_at: Utc::now(),
            };
            transcript.push(message);
            pending.push(NewMessage {
                turn: next_turn,
                speaker_id: speaker.speaker_id().to_string(),
                text: text.clone(),
            });

            let _ = events.send(Event::Turn {
                entry: TurnEntry {
                    turn: next_turn,
                    speaker: display_name(&speaker).to_string(),
                    speaker_id: speaker.speaker_id().to_string(),
                    text: text.clone(),
                },
                total_turns: transcript.len() as i64,
                quality: Quality { similarity_to_previous: similarity, repetition_streak },
            });

            info!(conversation_id = %conversation_id, next_turn, similarity, repetition_streak, "turn generated");

            if repetition_streak >= self.config.max_repetition_streak {
                stop_reason = "repetition_guard".to_string();
                break;
            }
            if signaled_done {
                stop_reason = "done_token".to_string();
                break;
            }

            if pending.len() as i64 % self.config.moderator_interval == 0 {
                let last_n: Vec<String> = transcript
                    .iter()
                    .rev()
                    .take(8)
                    .rev()
                    .map(|m| format!("{}: {}", m.speaker_id, m.text))
                    .collect();
                let top_tokens: Vec<String> =
                    compressed_view.lexical_tokens.iter().take(20).map(|t| t.token.clone()).collect();

                let moderation = moderator
                    .evaluate(
                        &topic,
                        &last_n,
                        &top_tokens,
                        moderator_directive.as_deref(),
                        self.generator.as_ref(),
                        llm_timeout,
                    )
                    .await;
                moderator_directive = Some(moderation.directive.clone());

                let _ = events.send(Event::Moderator {
                    moderation: moderation.clone(),
                    total_turns: transcript.len() as i64,
                });

                if moderation.done {
                    stop_reason = "moderator_done".to_string();
                    break;
                }
            }
        }

        let saved = match self.store.append_messages(&conversation_id, &pending).await {
            Ok(saved) => saved,
            Err(err) => {
                let _ = events.send(Event::Error { error: err.to_string() });
                return Err(err.into());
            }
        };
        let total_turns = (transcript.len() - pending.len()) as i64 + saved.len() as i64;
        let stats = match self
            .memory
            .ingest(&conversation_id, &saved, total_turns, self.generator.as_ref())
            .await
        {
            Ok(stats) => stats,
            Err(err) => {
                let _ = events.send(Event::Error { error: err.to_string() });
                return Err(err.into());
            }
        };

        let _ = events.send(Event::Done {
            conversation_id: conversation_id.clone(),
            topic: topic.clone(),
            turns,
            total_turns,
            stop_reason: stop_reason.clone(),
            memory: stats.clone(),
        });

        Ok(DoneSummary {
            conversation_id,
            topic,
            turns,
            total_turns,
            stop_reason,
            memory_stats: stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, OrchestratorConfig};
    use crate::llm::LocalDeterministic;
    use crate::store::sqlite::SqliteStore;

    async fn orchestrator(config: OrchestratorConfig) -> (Arc<SqliteStore>, TurnOrchestrator<SqliteStore>) {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        let memory = Arc::new(MemoryEngine::new(
            store.clone(),
            MemoryConfig::from_env(),
            Duration::from_millis(100),
        ));
        let generator: Arc<dyn Generator> = Arc::new(LocalDeterministic);
        (store.clone(), TurnOrchestrator::new(store, memory, generator, config))
    }

    #[test]
    fn strips_done_prefix_case_insensitively() {
        let (done, text) = strip_done_prefix("DONE: agreed on LRU.");
        assert!(done);
        assert_eq!(text, "agreed on LRU.");

        let (done2, text2) = strip_done_prefix("done - agreed on LRU.");
        assert!(done2);
        assert_eq!(text2, "agreed on LRU.");

        let (done3, _) = strip_done_prefix("we are not done yet");
        assert!(!done3);
    }

    #[test]
    fn clamps_turns_to_bounds() {
        assert_eq!(clamp_turns(None), 10);
        assert_eq!(clamp_turns(Some(1)), 2);
        assert_eq!(clamp_turns(Some(99)), 10);
        assert_eq!(clamp_turns(Some(5)), 5);
    }

    #[tokio::test]
    async fn new_conversation_runs_to_max_turns_with_local_generator() {
        let (_store, orch) = orchestrator(OrchestratorConfig {
            moderator_interval: 100,
            ..OrchestratorConfig::from_env()
        })
        .await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let request = TurnRequest { conversation_id: None, topic: Some("cache policy".into()), turns: Some(3) };

        let summary = orch.run_conversation(request, tx).await.unwrap();
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.total_turns, 3);
        assert_eq!(summary.stop_reason, "max_turns");

        let mut saw_meta = false;
        let mut turn_count = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::Meta { .. } => saw_meta = true,
                Event::Turn { .. } => turn_count += 1,
                _ => {}
            }
        }
        assert!(saw_meta);
        assert_eq!(turn_count, 3);
    }
}
