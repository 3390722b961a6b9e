// src/llm/mod.rs
// Generator trait abstracting over a remote LLM call and a local
// deterministic fallback, plus a combinator that always prefers the
// former and demotes to the latter on any failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::LlmError;

/// A chat message in role/content form, the lowest common denominator
/// across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// A completed generation plus the parameters it was produced under.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Generates a single completion from a list of messages. Implementors
/// never leak transport-specific errors past `LlmError` — callers always
/// get a typed, demotable error.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;
}

/// A generic JSON chat-completion client. The wire format of any given
/// provider is out of scope here; this models the shape most OpenAI-style
/// APIs share (a `messages` array, a `choices[0].message.content` reply)
/// since the concrete provider is an external collaborator.
pub struct RemoteLlm {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl RemoteLlm {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Generator for RemoteLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let body = ChatRequestBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::time::timeout(request.timeout, req.send())
            .await
            .map_err(|_| LlmError::Timeout(request.timeout.as_millis() as u64))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("empty choices array".into()))
    }
}

/// Deterministic, offline generator used as a fallback and in tests.
/// Never fails.
pub struct LocalDeterministic;

#[async_trait]
impl Generator for LocalDeterministic {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let excerpt: String = last_user.split_whitespace().take(18).collect::<Vec<_>>().join(" ");
        Ok(format!("Building on the discussion so far, {}.", excerpt))
    }
}

/// Wraps a primary `Generator` with a fallback that runs whenever the
/// primary errors. Never itself returns `Err` — that would defeat the
/// point of a fallback.
pub struct WithFallback<P: Generator, F: Generator> {
    primary: P,
    fallback: F,
}

impl<P: Generator, F: Generator> WithFallback<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// Generates with the primary, demoting to the fallback (which is
    /// infallible by contract) on any error. Logs the demotion at `warn`.
    async fn generate_or_fallback(&self, request: GenerationRequest) -> String {
        let fallback_request = GenerationRequest {
            messages: request.messages.clone(),
            temperature: request.temperature,
            timeout: request.timeout,
        };

        match self.primary.generate(request).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "llm generation failed, using local fallback");
                self.fallback
                    .generate(fallback_request)
                    .await
                    .unwrap_or_else(|_| "Let's continue from where we left off.".to_string())
            }
        }
    }
}

/// `WithFallback` is itself a `Generator` that never errors, so it can be
/// used anywhere a plain `Generator` is expected (the Memory Engine and
/// Turn Orchestrator both take `&dyn Generator`).
#[async_trait]
impl<P: Generator, F: Generator> Generator for WithFallback<P, F> {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        Ok(self.generate_or_fallback(request).await)
    }
}
