// src/main.rs
// colloquy CLI: starts a conversation from a topic, drives the turn
// loop, and prints NDJSON events to stdout. The minimal external driver
// for the core — a bundled HTTP server is explicitly out of scope.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colloquy::{ColloquyConfig, MemoryEngine, SqliteStore, TurnOrchestrator, TurnRequest};
use colloquy::llm::{Generator, LocalDeterministic, RemoteLlm, WithFallback};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "colloquy", about = "Drives a long-running two-agent dialogue with tiered memory.")]
struct Cli {
    /// Topic for a new conversation. Ignored if --conversation-id is set.
    #[arg(long)]
    topic: Option<String>,

    /// Resume an existing conversation by id.
    #[arg(long)]
    conversation_id: Option<String>,

    /// Number of turns to run, clamped to [2, 10].
    #[arg(long)]
    turns: Option<i64>,

    /// Remote LLM chat-completion endpoint. Omit to run fully offline.
    #[arg(long, env = "LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    #[arg(long, env = "LLM_API_KEY")]
    llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,
}

fn build_generator(cli: &Cli) -> Arc<dyn Generator> {
    match &cli.llm_endpoint {
        Some(endpoint) => {
            let remote = RemoteLlm::new(endpoint.clone(), cli.llm_api_key.clone(), cli.llm_model.clone());
            Arc::new(WithFallback::new(remote, LocalDeterministic))
        }
        None => Arc::new(LocalDeterministic),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ColloquyConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    let store = Arc::new(SqliteStore::connect(&config.database_path).await?);
    let memory = Arc::new(MemoryEngine::new(
        store.clone(),
        config.memory.clone(),
        Duration::from_millis(config.orchestrator.llm_request_timeout_ms),
    ));
    let generator = build_generator(&cli);
    let orchestrator = TurnOrchestrator::new(store, memory, generator, config.orchestrator.clone());

    let request = TurnRequest {
        conversation_id: cli.conversation_id,
        topic: cli.topic,
        turns: cli.turns,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout = std::io::stdout();

    let printer = tokio::spawn(async move {
        let mut out = stdout.lock();
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(out, "{}", line);
            }
        }
    });

    let summary = orchestrator.run_conversation(request, tx).await;
    printer.await.ok();

    match summary {
        Ok(done) => {
            tracing::info!(
                conversation_id = %done.conversation_id,
                stop_reason = %done.stop_reason,
                total_turns = done.total_turns,
                "conversation finished"
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{{\"type\":\"error\",\"error\":{:?}}}", err.to_string());
            Err(err.into())
        }
    }
}
