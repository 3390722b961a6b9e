// tests/scenarios.rs
// End-to-end scenarios exercised against an in-memory SQLite store,
// covering the six scenarios enumerated in SPEC_FULL.md's testable
// properties section.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use colloquy::config::{MemoryConfig, OrchestratorConfig};
use colloquy::llm::{GenerationRequest, Generator};
use colloquy::store::sqlite::SqliteStore;
use colloquy::{ColloquyError, Event, MemoryEngine, TurnOrchestrator, TurnRequest};
use colloquy::error::StoreError;

/// Returns a fixed, scripted sequence of completions, one per call. Once
/// exhausted, repeats the last one.
struct ScriptedGenerator {
    scripts: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedGenerator {
    fn new(scripts: Vec<&str>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(String::from).collect()),
            last: Mutex::new(String::new()),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, colloquy::error::LlmError> {
        let mut scripts = self.scripts.lock().unwrap();
        let next = scripts.pop_front();
        let text = match next {
            Some(t) => t,
            None => self.last.lock().unwrap().clone(),
        };
        *self.last.lock().unwrap() = text.clone();
        Ok(text)
    }
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn build_orchestrator(
    orchestrator_config: OrchestratorConfig,
    generator: Arc<dyn Generator>,
) -> (Arc<SqliteStore>, TurnOrchestrator<SqliteStore>) {
    let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
    let memory = Arc::new(MemoryEngine::new(
        store.clone(),
        MemoryConfig::from_env(),
        Duration::from_millis(100),
    ));
    (store.clone(), TurnOrchestrator::new(store, memory, generator, orchestrator_config))
}

#[tokio::test]
async fn scenario_1_stop_on_done() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        "Let's examine the cache eviction tradeoffs first.",
        "LRU is simplest to reason about given our access pattern.",
        "DONE: agreed on LRU.",
    ]));
    let (_store, orch) = build_orchestrator(
        OrchestratorConfig { moderator_interval: 100, ..OrchestratorConfig::from_env() },
        generator,
    )
    .await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let request = TurnRequest { conversation_id: None, topic: Some("cache policy".into()), turns: Some(10) };
    let summary = orch.run_conversation(request, tx).await.unwrap();

    assert_eq!(summary.stop_reason, "done_token");
    assert_eq!(summary.total_turns, 3);

    let events = drain(&mut rx);
    let last_turn = events
        .iter()
        .filter_map(|e| match e {
            Event::Turn { entry, .. } => Some(entry.clone()),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_turn.text, "agreed on LRU.");
}

#[tokio::test]
async fn scenario_2_repetition_guard() {
    let paragraph = "We keep returning to the same point about optimistic locking and database contention without adding anything new here today.";
    let generator = Arc::new(ScriptedGenerator::new(vec![paragraph, paragraph, paragraph]));
    let (_store, orch) = build_orchestrator(
        OrchestratorConfig { moderator_interval: 100, max_repetition_streak: 2, ..OrchestratorConfig::from_env() },
        generator,
    )
    .await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let request = TurnRequest { conversation_id: None, topic: Some("cache policy".into()), turns: Some(10) };
    let summary = orch.run_conversation(request, tx).await.unwrap();

    assert_eq!(summary.stop_reason, "repetition_guard");

    let streaks: Vec<i64> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::Turn { quality, .. } => Some(quality.repetition_streak),
            _ => None,
        })
        .collect();
    assert_eq!(streaks, vec![0, 1, 2]);
}

#[tokio::test]
async fn scenario_3_moderator_trigger_interval() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        "First point about cache sizing.",
        "Second point about eviction policy choices.",
        "Third point about monitoring hit rates.",
        "Fourth point about rollout sequencing.",
    ]));
    let (_store, orch) = build_orchestrator(
        OrchestratorConfig { moderator_interval: 2, ..OrchestratorConfig::from_env() },
        generator,
    )
    .await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let request = TurnRequest { conversation_id: None, topic: Some("cache policy".into()), turns: Some(4) };
    let summary = orch.run_conversation(request, tx).await.unwrap();
    assert_eq!(summary.total_turns, 4);

    let events = drain(&mut rx);
    let mut moderator_after_turns = Vec::new();
    let mut turns_seen = 0;
    for event in &events {
        match event {
            Event::Turn { .. } => turns_seen += 1,
            Event::Moderator { total_turns, .. } => {
                moderator_after_turns.push(*total_turns);
                assert_eq!(turns_seen, *total_turns);
            }
            _ => {}
        }
    }
    assert_eq!(moderator_after_turns, vec![2, 4]);
}

#[tokio::test]
async fn scenario_4_tiered_compaction_counts() {
    let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
    store.create_conversation("c1", "cache policy").await.unwrap();
    let entries: Vec<colloquy::store::NewMessage> = (1..=16)
        .map(|t| colloquy::store::NewMessage {
            turn: t,
            speaker_id: if t % 2 == 1 { "agent-a" } else { "agent-b" }.to_string(),
            text: format!("We should adopt optimistic locking for the database in turn {}.", t),
        })
        .collect();
    store.append_messages("c1", &entries).await.unwrap();

    let config = MemoryConfig {
        min_turns_for_summary: 4,
        summary_window: 4,
        meso_group: 2,
        ..MemoryConfig::from_env()
    };
    let engine = MemoryEngine::new(store.clone(), config, Duration::from_millis(100));
    let generator = colloquy::llm::LocalDeterministic;
    engine.bootstrap_if_needed("c1", &generator).await.unwrap();

    let micro = store.list_all_micro_summaries("c1").await.unwrap();
    let meso = store.list_all_tier_summaries("c1", colloquy::store::Tier::Meso).await.unwrap();
    let macro_ = store.list_all_tier_summaries("c1", colloquy::store::Tier::Macro).await.unwrap();

    assert_eq!(micro.len(), 4);
    assert_eq!(meso.len(), 2);
    assert_eq!(macro_.len(), 0);
}

#[tokio::test]
async fn scenario_5_conflict_detection_with_negation_mismatch() {
    let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
    store.create_conversation("c1", "locking strategy").await.unwrap();

    let entries = vec![
        colloquy::store::NewMessage {
            turn: 1,
            speaker_id: "agent-a".into(),
            text: "We will adopt optimistic locking for the service.".into(),
        },
        colloquy::store::NewMessage {
            turn: 2,
            speaker_id: "agent-b".into(),
            text: "We will not adopt optimistic locking for the service.".into(),
        },
    ];
    store.append_messages("c1", &entries).await.unwrap();

    let engine = MemoryEngine::new(store.clone(), MemoryConfig::from_env(), Duration::from_millis(100));
    let generator = colloquy::llm::LocalDeterministic;
    engine.bootstrap_if_needed("c1", &generator).await.unwrap();

    let conflicts = store.list_conflict_entries("c1", 10).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].confidence >= 0.70);
    assert!(conflicts[0].issue_key.starts_with("decision|decision|"));
}

#[tokio::test]
async fn scenario_6_env_clamping() {
    unsafe { std::env::set_var("LEXICAL_KEEP", "9999") };
    let config = MemoryConfig::from_env();
    assert_eq!(config.lexical_keep, 500);
    unsafe { std::env::set_var("LEXICAL_KEEP", "abc") };
    let config2 = MemoryConfig::from_env();
    assert_eq!(config2.lexical_keep, 180);
    unsafe { std::env::remove_var("LEXICAL_KEEP") };
}

#[tokio::test]
async fn unknown_conversation_id_is_a_validation_error() {
    let generator = Arc::new(ScriptedGenerator::new(vec!["irrelevant"]));
    let (_store, orch) = build_orchestrator(OrchestratorConfig::from_env(), generator).await;

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let request = TurnRequest { conversation_id: Some("does-not-exist".into()), topic: None, turns: Some(2) };
    let result = orch.run_conversation(request, tx).await;

    assert!(matches!(result, Err(ColloquyError::Validation(_))));
}

#[tokio::test]
async fn duplicate_turn_is_a_store_error() {
    let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
    store.create_conversation("c1", "t").await.unwrap();
    store
        .append_messages(
            "c1",
            &[colloquy::store::NewMessage { turn: 1, speaker_id: "agent-a".into(), text: "hi".into() }],
        )
        .await
        .unwrap();

    let result = store
        .append_messages(
            "c1",
            &[colloquy::store::NewMessage { turn: 1, speaker_id: "agent-b".into(), text: "overwrite".into() }],
        )
        .await;

    assert!(matches!(result, Err(StoreError::DuplicateTurn { .. })));
}
