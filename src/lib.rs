// src/lib.rs
// colloquy: a multi-tier conversational memory core driving long-running
// two-agent dialogues on a fixed topic.

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod store;

pub use config::ColloquyConfig;
pub use error::{ColloquyError, ColloquyResult};
pub use memory::MemoryEngine;
pub use orchestrator::{DoneSummary, Event, TurnOrchestrator, TurnRequest};
pub use store::{sqlite::SqliteStore, Store};
