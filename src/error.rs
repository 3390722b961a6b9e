// src/error.rs
// Error types for the colloquy core.

use thiserror::Error;

/// Store-layer errors. I/O and constraint failures here are fatal for the
/// request that triggered them — never silently swallowed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate turn for conversation {conversation_id}: turn {turn}")]
    DuplicateTurn { conversation_id: String, turn: i64 },
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-input validation errors. Surfaced directly, never change state.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing topic for new conversation")]
    MissingTopic,
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
}

/// Recoverable LLM-call errors. These never cross the `Generator` trait
/// boundary as an `Err` that aborts a request — every caller of a
/// `Generator` demotes this to a local fallback at the call site.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm request timed out after {0}ms")]
    Timeout(u64),
    #[error("malformed llm response: {0}")]
    MalformedResponse(String),
}

/// Top-level error for the orchestration boundary.
#[derive(Error, Debug)]
pub enum ColloquyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ColloquyResult<T> = Result<T, ColloquyError>;
